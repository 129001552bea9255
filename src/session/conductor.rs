//! Session conductor: negotiation state machine and channel wiring

use crate::channels::{ChannelMode, DataChannel, COMMAND_CHANNEL_LABEL, TELEMETRY_CHANNEL_LABEL};
use crate::config::ConsoleConfig;
use crate::events::ConsoleEvent;
use crate::model::{map_range, DeviceModel};
use crate::signaling::{CandidateInit, SignalMessage, SignalSender};
use crate::telemetry::{Cmd, DeviceUpdate};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Negotiation progress of one session. `Failed` is terminal and can be
/// entered from any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No offer sent yet
    Idle,
    /// Offer sent, waiting for the remote answer
    OfferSent,
    /// Remote answer applied, controls live
    Connected,
    /// Negotiation failed; the session must be rebuilt to retry
    Failed,
}

/// Drives one WebRTC session against the device: owns the peer connection,
/// both data channels, and the negotiation state machine. Signaling frames
/// come in via [`handle_signal`](SessionConductor::handle_signal); outgoing
/// frames leave through the [`SignalSender`] it was built with.
pub struct SessionConductor {
    session_id: String,
    config: ConsoleConfig,
    peer_connection: Arc<RTCPeerConnection>,
    telemetry_channel: DataChannel,
    command_channel: DataChannel,
    state: Arc<RwLock<NegotiationState>>,
    signals: SignalSender,
    events: mpsc::UnboundedSender<ConsoleEvent>,
    frames: Arc<AtomicU64>,
    frames_total: Arc<AtomicU64>,
    controls_enabled: Arc<AtomicBool>,
    timeout_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    rate_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionConductor {
    /// Build the peer connection and both data channels. The channels are
    /// created before the offer so both are negotiated in the initial SDP.
    pub async fn new(
        config: ConsoleConfig,
        model: Arc<DeviceModel>,
        signals: SignalSender,
        events: mpsc::UnboundedSender<ConsoleEvent>,
    ) -> Result<Self> {
        config.validate()?;

        let session_id = uuid::Uuid::new_v4().to_string();
        info!("Creating session {}", session_id);

        let peer_connection = Arc::new(build_peer_connection(&config).await?);

        let telemetry_channel = DataChannel::new(
            &peer_connection,
            TELEMETRY_CHANNEL_LABEL,
            ChannelMode::Unreliable,
        )
        .await?;

        let command_channel = DataChannel::new(
            &peer_connection,
            COMMAND_CHANNEL_LABEL,
            ChannelMode::Reliable,
        )
        .await?;

        let conductor = Self {
            session_id,
            config,
            peer_connection,
            telemetry_channel,
            command_channel,
            state: Arc::new(RwLock::new(NegotiationState::Idle)),
            signals,
            events,
            frames: Arc::new(AtomicU64::new(0)),
            frames_total: Arc::new(AtomicU64::new(0)),
            controls_enabled: Arc::new(AtomicBool::new(false)),
            timeout_task: Arc::new(Mutex::new(None)),
            rate_task: Mutex::new(None),
        };

        conductor.wire_telemetry(model);
        conductor.wire_command_open();
        conductor.wire_ice_forwarding();
        conductor.wire_connection_state();
        conductor.spawn_rate_task();

        Ok(conductor)
    }

    /// Telemetry frames decode into the model; malformed frames are
    /// dropped without touching it.
    fn wire_telemetry(&self, model: Arc<DeviceModel>) {
        let frames = Arc::clone(&self.frames);
        let frames_total = Arc::clone(&self.frames_total);
        self.telemetry_channel.on_binary_message(move |data| {
            let model = Arc::clone(&model);
            let frames = Arc::clone(&frames);
            let frames_total = Arc::clone(&frames_total);
            async move {
                match DeviceUpdate::decode(&data) {
                    Ok(frame) => {
                        model.update(&frame);
                        frames.fetch_add(1, Ordering::Relaxed);
                        frames_total.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        debug!("Dropping telemetry frame: {}", e);
                    }
                }
            }
        });
    }

    fn wire_command_open(&self) {
        let session_id = self.session_id.clone();
        self.command_channel.on_open(move || async move {
            info!("Session {} command channel open", session_id);
        });
    }

    /// Trickle ICE: local candidates go to the relay as they are gathered.
    fn wire_ice_forwarding(&self) {
        let signals = self.signals.clone();
        let session_id = self.session_id.clone();

        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate| {
                let signals = signals.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else {
                        debug!("ICE gathering complete for session {}", session_id);
                        return;
                    };
                    match candidate.to_json() {
                        Ok(init) => {
                            let msg = SignalMessage::candidate(CandidateInit {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            });
                            if let Err(e) = signals.send(&msg) {
                                warn!("Failed to forward local ICE candidate: {}", e);
                            }
                        }
                        Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                    }
                })
            }));
    }

    fn wire_connection_state(&self) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let session_id = self.session_id.clone();

        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = Arc::clone(&state);
                let events = events.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    debug!("Session {} peer connection state: {}", session_id, s);
                    if s == RTCPeerConnectionState::Failed {
                        let already_failed = {
                            let mut state = state.write();
                            let was = *state;
                            *state = NegotiationState::Failed;
                            was == NegotiationState::Failed
                        };
                        if !already_failed {
                            let _ = events
                                .send(ConsoleEvent::negotiation_failed("Peer connection failed"));
                        }
                    }
                })
            }));
    }

    /// Once a second, report how many telemetry frames arrived.
    fn spawn_rate_task(&self) {
        let frames = Arc::clone(&self.frames);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately and would report zero
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let count = frames.swap(0, Ordering::Relaxed);
                if events.send(ConsoleEvent::TelemetryRate { frames: count }).is_err() {
                    break;
                }
            }
        });
        *self.rate_task.lock() = Some(handle);
    }

    /// Create and send the SDP offer. Valid only in `Idle`; arms the
    /// negotiation timeout.
    pub async fn open(&self) -> Result<()> {
        {
            let state = self.state.read();
            if *state != NegotiationState::Idle {
                return Err(Error::InvalidState(format!(
                    "Cannot open session in state {:?}",
                    *state
                )));
            }
        }

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.signals.send(&SignalMessage::offer(offer.sdp))?;
        *self.state.write() = NegotiationState::OfferSent;
        info!("Session {} offer sent", self.session_id);

        self.arm_timeout();

        Ok(())
    }

    fn arm_timeout(&self) {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let session_id = self.session_id.clone();
        let timeout = Duration::from_secs(self.config.offer_timeout_secs);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let timed_out = {
                let mut state = state.write();
                if *state == NegotiationState::OfferSent {
                    *state = NegotiationState::Failed;
                    true
                } else {
                    false
                }
            };
            if timed_out {
                warn!("Session {} negotiation timed out", session_id);
                let _ = events.send(ConsoleEvent::negotiation_failed(
                    "Timed out waiting for answer",
                ));
            }
        });
        *self.timeout_task.lock() = Some(handle);
    }

    /// Apply one inbound signaling message. Messages that do not fit the
    /// current state are logged and ignored rather than failing the
    /// session; the relay echoes traffic from both ends.
    pub async fn handle_signal(&self, msg: SignalMessage) -> Result<()> {
        match msg {
            SignalMessage::Answer(desc) => self.handle_answer(desc.sdp).await,
            SignalMessage::Candidate(init) => self.handle_candidate(init).await,
            SignalMessage::Offer(_) => {
                debug!("Ignoring offer; this side initiates negotiation");
                Ok(())
            }
        }
    }

    async fn handle_answer(&self, sdp: String) -> Result<()> {
        {
            let state = self.state.read();
            if *state != NegotiationState::OfferSent {
                warn!("Ignoring answer in state {:?}", *state);
                return Ok(());
            }
        }

        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::SdpError(format!("Invalid answer SDP: {}", e)))?;

        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;

        *self.state.write() = NegotiationState::Connected;
        if let Some(handle) = self.timeout_task.lock().take() {
            handle.abort();
        }
        info!("Session {} connected", self.session_id);
        if !self.controls_enabled.swap(true, Ordering::AcqRel) {
            let _ = self.events.send(ConsoleEvent::ControlsEnabled);
        }
        Ok(())
    }

    async fn handle_candidate(&self, init: CandidateInit) -> Result<()> {
        // Empty candidate marks end of trickle
        if init.candidate.is_empty() {
            debug!("Remote ICE gathering complete");
            return Ok(());
        }

        // Candidates are applied regardless of negotiation state; before a
        // remote description exists the transport rejects them, which is
        // logged and dropped like every other local failure.
        if let Err(e) = self
            .peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: init.candidate,
                sdp_mid: init.sdp_mid,
                sdp_mline_index: init.sdp_mline_index,
                username_fragment: None,
            })
            .await
        {
            warn!("Dropping ICE candidate: {}", e);
        }

        Ok(())
    }

    /// The signaling relay dropped. Connected sessions keep running on the
    /// established peer connection; a session still negotiating cannot
    /// complete and fails.
    pub fn signaling_lost(&self, code: u16, reason: &str) {
        let _ = self.events.send(ConsoleEvent::signaling_lost(code, reason));
        let failed = {
            let mut state = self.state.write();
            if *state == NegotiationState::OfferSent || *state == NegotiationState::Idle {
                *state = NegotiationState::Failed;
                true
            } else {
                false
            }
        };
        if failed {
            if let Some(handle) = self.timeout_task.lock().take() {
                handle.abort();
            }
            let _ = self
                .events
                .send(ConsoleEvent::negotiation_failed("Signaling connection lost"));
        }
    }

    /// Position a motor on its declared widget scale. The value is mapped
    /// onto the device's 0-255 command range; motors without declared
    /// bounds take the raw range directly. Dropped silently when the
    /// command channel is not open.
    pub async fn set_motor(&self, name: &str, value: f64) -> Result<()> {
        let scaled = match self.config.motor_bounds.get(name) {
            Some(bounds) => map_range(value, bounds.min, bounds.max, 0.0, 255.0),
            None => value,
        };
        let wire = scaled.round().clamp(0.0, 255.0) as u8;
        self.send_command(&Cmd::set_motor(name, wire)).await
    }

    /// Send a command envelope. Dropped silently when the channel is not
    /// yet open, matching the fire-and-forget semantics of the controls.
    pub async fn send_command(&self, cmd: &Cmd) -> Result<()> {
        if !self.command_channel.is_open() {
            debug!("Dropping command '{}': channel not open", cmd.cmd);
            return Ok(());
        }
        self.command_channel.send_json(cmd).await
    }

    /// Current negotiation state
    pub fn state(&self) -> NegotiationState {
        *self.state.read()
    }

    /// Session identifier
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Telemetry frames decoded since the last rate report
    pub fn pending_frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Total telemetry frames decoded over the session's lifetime
    pub fn frames_decoded(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    /// Tear the session down: stop background tasks and close the peer
    /// connection.
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.timeout_task.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.rate_task.lock().take() {
            handle.abort();
        }

        self.telemetry_channel.close().await.ok();
        self.command_channel.close().await.ok();

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))?;

        info!("Session {} closed", self.session_id);
        Ok(())
    }
}

async fn build_peer_connection(config: &ConsoleConfig) -> Result<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .map_err(|e| Error::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    let ice_servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }
        }))
        .collect();

    let rtc_config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    api.new_peer_connection(rtc_config)
        .await
        .map_err(|e| Error::WebRtcError(format!("Failed to create peer connection: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LayoutConfig;
    use std::collections::HashMap;

    async fn test_conductor() -> (
        SessionConductor,
        mpsc::UnboundedReceiver<ConsoleEvent>,
        mpsc::UnboundedReceiver<tokio_tungstenite::tungstenite::Message>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signals, signal_rx) = SignalSender::detached();
        let model = Arc::new(DeviceModel::new(
            &LayoutConfig::single("left_mtp", 2, 2),
            HashMap::new(),
            events_tx.clone(),
        ));
        let conductor = SessionConductor::new(
            ConsoleConfig::default(),
            model,
            signals,
            events_tx,
        )
        .await
        .unwrap();
        (conductor, events_rx, signal_rx)
    }

    #[tokio::test]
    async fn test_starts_idle() {
        let (conductor, _events, _signals) = test_conductor().await;
        assert_eq!(conductor.state(), NegotiationState::Idle);
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_sends_offer_and_transitions() {
        let (conductor, _events, mut signals) = test_conductor().await;
        conductor.open().await.unwrap();
        assert_eq!(conductor.state(), NegotiationState::OfferSent);

        let frame = signals.recv().await.unwrap();
        let text = frame.into_text().unwrap();
        let parsed = crate::signaling::protocol::parse(&text).unwrap().unwrap();
        assert_eq!(parsed.kind(), "offer");
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_rejected_outside_idle() {
        let (conductor, _events, _signals) = test_conductor().await;
        conductor.open().await.unwrap();
        let err = conductor.open().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_answer_ignored_in_idle() {
        let (conductor, _events, _signals) = test_conductor().await;
        let msg = SignalMessage::answer("v=0\r\n".to_string());
        conductor.handle_signal(msg).await.unwrap();
        assert_eq!(conductor.state(), NegotiationState::Idle);
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_candidate_in_idle_dropped_without_fault() {
        let (conductor, _events, _signals) = test_conductor().await;
        let msg = SignalMessage::candidate(CandidateInit {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        });
        conductor.handle_signal(msg).await.unwrap();
        assert_eq!(conductor.state(), NegotiationState::Idle);
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_motor_before_open_silently_dropped() {
        let (conductor, _events, _signals) = test_conductor().await;
        conductor.set_motor("left_pitch", 10.0).await.unwrap();
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_signaling_lost_fails_pending_negotiation() {
        let (conductor, mut events, _signals) = test_conductor().await;
        conductor.open().await.unwrap();
        conductor.signaling_lost(1006, "connection reset");
        assert_eq!(conductor.state(), NegotiationState::Failed);

        let first = events.recv().await.unwrap();
        assert_eq!(first.name(), "signaling_lost");
        let second = events.recv().await.unwrap();
        assert_eq!(second.name(), "negotiation_failed");
        conductor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_fails_negotiation() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (signals, _signal_rx) = SignalSender::detached();
        let model = Arc::new(DeviceModel::new(
            &LayoutConfig::single("left_mtp", 2, 2),
            HashMap::new(),
            events_tx.clone(),
        ));
        let config = ConsoleConfig {
            offer_timeout_secs: 1,
            ..Default::default()
        };
        let conductor = SessionConductor::new(config, model, signals, events_tx)
            .await
            .unwrap();

        conductor.open().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(conductor.state(), NegotiationState::Failed);

        let mut saw_failure = false;
        while let Ok(event) = events_rx.try_recv() {
            if event.name() == "negotiation_failed" {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        conductor.close().await.unwrap();
    }
}
