//! Data channel wrappers
//!
//! The session carries two channels with deliberately different delivery
//! contracts: telemetry flows on an unordered, lossy channel (latest state
//! wins, losses are fine), commands flow on an ordered, reliable one.

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Label of the inbound telemetry channel
pub const TELEMETRY_CHANNEL_LABEL: &str = "data";

/// Label of the outbound command channel
pub const COMMAND_CHANNEL_LABEL: &str = "command";

/// Delivery contract of a data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Ordered delivery without loss; for commands
    Reliable,
    /// Unordered delivery, no retransmits; for telemetry
    Unreliable,
}

impl ChannelMode {
    /// Ordered setting for the underlying SCTP stream
    pub fn ordered(&self) -> bool {
        matches!(self, ChannelMode::Reliable)
    }

    /// Retransmit limit for the underlying SCTP stream
    pub fn max_retransmits(&self) -> Option<u16> {
        match self {
            ChannelMode::Reliable => None,
            ChannelMode::Unreliable => Some(0),
        }
    }
}

/// Channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel created, transport still negotiating
    Connecting,
    /// Channel open and ready for messages
    Open,
    /// Channel closed
    Closed,
}

/// Wrapper around one RTCDataChannel with open-state tracking and
/// message counters.
pub struct DataChannel {
    label: String,
    rtc_channel: Arc<RTCDataChannel>,
    mode: ChannelMode,
    state: Arc<RwLock<ChannelState>>,
    messages_sent: Arc<AtomicU64>,
    messages_received: Arc<AtomicU64>,
}

impl DataChannel {
    /// Create a new data channel on an existing peer connection
    pub async fn new(
        peer_connection: &RTCPeerConnection,
        label: &str,
        mode: ChannelMode,
    ) -> Result<Self> {
        let init = RTCDataChannelInit {
            ordered: Some(mode.ordered()),
            max_retransmits: mode.max_retransmits(),
            ..Default::default()
        };

        let rtc_channel = peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to create channel: {}", e)))?;

        let channel = Self {
            label: label.to_string(),
            rtc_channel,
            mode,
            state: Arc::new(RwLock::new(ChannelState::Connecting)),
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_received: Arc::new(AtomicU64::new(0)),
        };

        channel.setup_state_handlers();

        Ok(channel)
    }

    fn setup_state_handlers(&self) {
        self.on_open(|| async {});

        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        self.rtc_channel.on_close(Box::new(move || {
            debug!("Data channel '{}' closed", label);
            *state.write() = ChannelState::Closed;
            Box::pin(async {})
        }));

        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!("Data channel '{}' error: {}", label, err);
            })
        }));
    }

    /// Register an open handler. The channel's own state tracking stays in
    /// place; the handler runs after the state flips to open.
    pub fn on_open<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        self.rtc_channel.on_open(Box::new(move || {
            debug!("Data channel '{}' opened", label);
            *state.write() = ChannelState::Open;
            Box::pin(handler())
        }));
    }

    /// Send a JSON-serializable value. Fails when the channel is not open;
    /// callers that tolerate an unready channel absorb the error.
    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_vec(value)
            .map_err(|e| Error::DataChannelError(format!("Failed to serialize: {}", e)))?;
        self.send_binary(&json).await
    }

    /// Send raw bytes over the channel
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        let state = *self.state.read();
        if state != ChannelState::Open {
            return Err(Error::DataChannelError(format!(
                "Channel '{}' is not open (state: {:?})",
                self.label, state
            )));
        }

        self.rtc_channel
            .send(&bytes::Bytes::copy_from_slice(data))
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send: {}", e)))?;

        self.messages_sent.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }

    /// Register the raw binary message handler
    pub fn on_binary_message<F, Fut>(&self, handler: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let messages_received = Arc::clone(&self.messages_received);
        let handler = Arc::new(handler);

        self.rtc_channel.on_message(Box::new(move |msg| {
            let messages_received = Arc::clone(&messages_received);
            let handler = Arc::clone(&handler);
            let data = msg.data.to_vec();

            Box::pin(async move {
                messages_received.fetch_add(1, Ordering::Relaxed);
                handler(data).await;
            })
        }));
    }

    /// Channel label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Channel delivery mode
    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    /// Current channel state
    pub fn state(&self) -> ChannelState {
        *self.state.read()
    }

    /// Whether the channel is open for sending
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Messages sent so far
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Messages received so far
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Close the channel
    pub async fn close(&self) -> Result<()> {
        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close channel: {}", e)))?;

        *self.state.write() = ChannelState::Closed;
        Ok(())
    }
}
