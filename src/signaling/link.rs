//! WebSocket signaling link to the relay
//!
//! One long-lived connection per session, used only for negotiation
//! messages. A sender task drains an outbound queue; a receiver task
//! parses inbound frames and forwards them to the conductor's mailbox.

use super::protocol::{self, SignalMessage};
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Close codes at or above this value are treated as abnormal
/// (1002 = protocol error, mirroring the relay's failure signaling).
const ABNORMAL_CLOSE_THRESHOLD: u16 = 1002;

/// Events delivered from the link's receiver task
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// A recognized negotiation message arrived
    Signal(SignalMessage),

    /// The connection closed abnormally; fatal to the session.
    /// Clean closes produce no event.
    Lost {
        /// Close code reported by the relay (1006 when the stream errored)
        code: u16,
        /// Close reason text, if any
        reason: String,
    },
}

/// Cloneable handle for transmitting negotiation messages
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl SignalSender {
    /// Serialize and enqueue a message; no retry, no delivery guarantee
    /// beyond the underlying connection's.
    pub fn send(&self, msg: &SignalMessage) -> Result<()> {
        let json = msg.to_json()?;
        debug!("Sending signaling message: {}", json);

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::SignalingError(format!("Relay connection gone: {}", e)))
    }

    /// Detached sender plus the raw outbound queue, for tests that inspect
    /// what would have gone to the relay.
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Persistent relay connection carrying negotiation messages both ways
pub struct SignalingLink {
    url: String,
    sender: SignalSender,
}

impl SignalingLink {
    /// Connect to the relay and spawn the sender/receiver tasks.
    ///
    /// Returns the link and the inbound event stream. The receiver task
    /// ends when the connection closes; there is no automatic reconnect.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>)> {
        info!("Connecting to signaling relay: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        info!("Connected to signaling relay");

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, out_rx));
        tokio::spawn(Self::receiver_task(read, event_tx));

        Ok((
            Self {
                url: url.to_string(),
                sender: SignalSender { tx: out_tx },
            },
            event_rx,
        ))
    }

    /// The relay URL this link was dialed against
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Handle for transmitting negotiation messages
    pub fn sender(&self) -> SignalSender {
        self.sender.clone()
    }

    /// Sender task: drains the outbound queue into the WebSocket
    async fn sender_task(
        mut write: futures_util::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send relay message: {}", e);
                break;
            }
        }

        debug!("Signaling sender task terminated");
    }

    /// Receiver task: parses inbound frames and forwards recognized
    /// messages; surfaces abnormal closes as `LinkEvent::Lost`.
    async fn receiver_task(
        mut read: futures_util::stream::SplitStream<WsStream>,
        event_tx: mpsc::UnboundedSender<LinkEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match protocol::parse(&text) {
                    Ok(Some(signal)) => {
                        if event_tx.send(LinkEvent::Signal(signal)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping unparseable relay message: {}", e),
                },
                Ok(Message::Close(frame)) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1000, String::new()));

                    if code >= ABNORMAL_CLOSE_THRESHOLD {
                        warn!("Relay connection closed abnormally: {} {}", code, reason);
                        let _ = event_tx.send(LinkEvent::Lost { code, reason });
                    } else {
                        info!("Relay connection closed");
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Relay connection error: {}", e);
                    let _ = event_tx.send(LinkEvent::Lost {
                        code: 1006,
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }

        debug!("Signaling receiver task terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_sender_serializes() {
        let (sender, mut rx) = SignalSender::detached();
        sender
            .send(&SignalMessage::offer("v=0\r\n".to_string()))
            .unwrap();

        match rx.try_recv().unwrap() {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "offer");
                assert_eq!(value["sdp"], "v=0\r\n");
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[test]
    fn test_send_after_receiver_dropped_is_error() {
        let (sender, rx) = SignalSender::detached();
        drop(rx);
        assert!(sender
            .send(&SignalMessage::answer(String::new()))
            .is_err());
    }
}
