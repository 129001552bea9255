//! Loopback test harness
//!
//! Stands in for the device end of a session: a second peer connection that
//! answers the console's offer over an in-process signaling loop, accepts
//! its data channels, and can inject telemetry or observe commands.

#![allow(dead_code)]

use dynastat_console::signaling::protocol;
use dynastat_console::{
    ConsoleConfig, ConsoleEvent, DeviceModel, LayoutConfig, MotorBounds, SessionConductor,
    SignalMessage, SignalSender,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const HARNESS_TIMEOUT: Duration = Duration::from_secs(20);

/// A negotiated console/device pair running over localhost
pub struct Loopback {
    pub conductor: Arc<SessionConductor>,
    pub device: Arc<RTCPeerConnection>,
    pub model: Arc<DeviceModel>,
    pub events: mpsc::UnboundedReceiver<ConsoleEvent>,
    device_channels: mpsc::UnboundedReceiver<(String, Arc<RTCDataChannel>)>,
    channel_stash: HashMap<String, Arc<RTCDataChannel>>,
    forward_task: JoinHandle<()>,
}

impl Loopback {
    /// Wait until the device side sees the labeled channel open
    pub async fn device_channel(&mut self, label: &str) -> Arc<RTCDataChannel> {
        if let Some(dc) = self.channel_stash.remove(label) {
            return dc;
        }
        timeout(HARNESS_TIMEOUT, async {
            loop {
                let (seen, dc) = self
                    .device_channels
                    .recv()
                    .await
                    .expect("device channel stream ended");
                if seen == label {
                    return dc;
                }
                self.channel_stash.insert(seen, dc);
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for device channel '{}'", label))
    }

    /// Wait for the next console event with the given name, discarding
    /// others
    pub async fn wait_for_event(&mut self, name: &str) -> ConsoleEvent {
        timeout(HARNESS_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event stream ended");
                if event.name() == name {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for event '{}'", name))
    }

    /// Tear both ends down
    pub async fn shutdown(self) {
        self.forward_task.abort();
        self.conductor.close().await.ok();
        self.device.close().await.ok();
    }
}

/// Build the device-side peer connection
pub async fn build_device_peer() -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .expect("failed to register codecs");

    let interceptor_registry = register_default_interceptors(Default::default(), &mut media_engine)
        .expect("failed to register interceptors");

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(interceptor_registry)
        .build();

    // Host candidates are enough for a loopback pair
    let config = RTCConfiguration::default();

    Arc::new(
        api.new_peer_connection(config)
            .await
            .expect("failed to create device peer connection"),
    )
}

/// Negotiate a console session against an in-process device peer and wait
/// until the console reports its controls enabled.
pub async fn connect_loopback(
    layout: &LayoutConfig,
    bounds: HashMap<String, MotorBounds>,
) -> Loopback {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (signals, mut signal_rx) = SignalSender::detached();

    let model = Arc::new(DeviceModel::new(layout, bounds.clone(), events_tx.clone()));

    let config = ConsoleConfig {
        motor_bounds: bounds,
        ..Default::default()
    };
    let conductor = Arc::new(
        SessionConductor::new(config, Arc::clone(&model), signals, events_tx)
            .await
            .expect("failed to build conductor"),
    );

    let device = build_device_peer().await;

    // Surface the console's channels as the device sees them open
    let (chan_tx, device_channels) = mpsc::unbounded_channel();
    device.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let chan_tx = chan_tx.clone();
        Box::pin(async move {
            let label = dc.label().to_string();
            let dc_for_open = Arc::clone(&dc);
            dc.on_open(Box::new(move || {
                let _ = chan_tx.send((label, dc_for_open));
                Box::pin(async {})
            }));
        })
    }));

    conductor.open().await.expect("open failed");

    // The first relay frame is always the offer
    let offer_sdp = match next_signal(&mut signal_rx).await {
        SignalMessage::Offer(desc) => desc.sdp,
        other => panic!("expected offer, got {:?}", other),
    };

    let offer = RTCSessionDescription::offer(offer_sdp).expect("bad offer sdp");
    device
        .set_remote_description(offer)
        .await
        .expect("device rejected offer");

    let answer = device.create_answer(None).await.expect("create_answer");
    let mut gather_complete = device.gathering_complete_promise().await;
    device
        .set_local_description(answer)
        .await
        .expect("set_local_description");

    // Non-trickle on the device side: the answer carries all candidates
    let _ = timeout(HARNESS_TIMEOUT, gather_complete.recv()).await;
    let answer_sdp = device
        .local_description()
        .await
        .expect("no local description")
        .sdp;

    conductor
        .handle_signal(SignalMessage::answer(answer_sdp))
        .await
        .expect("answer rejected");

    // Keep feeding the console's trickled candidates to the device
    let device_for_forward = Arc::clone(&device);
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = signal_rx.recv().await {
            let Message::Text(text) = msg else { continue };
            if let Ok(Some(SignalMessage::Candidate(init))) = protocol::parse(&text) {
                let _ = device_for_forward
                    .add_ice_candidate(RTCIceCandidateInit {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: None,
                    })
                    .await;
            }
        }
    });

    Loopback {
        conductor,
        device,
        model,
        events: events_rx,
        device_channels,
        channel_stash: HashMap::new(),
        forward_task,
    }
}

async fn next_signal(rx: &mut mpsc::UnboundedReceiver<Message>) -> SignalMessage {
    let msg = timeout(HARNESS_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for signaling frame")
        .expect("signaling stream ended");
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {:?}", msg);
    };
    protocol::parse(&text)
        .expect("unparseable signaling frame")
        .expect("unrecognized signaling frame")
}
