//! Signaling relay protocol and link
//!
//! Negotiation messages travel over a persistent WebSocket connection to
//! the relay; the peer transport itself never touches this path.

pub mod link;
pub mod protocol;

pub use link::{LinkEvent, SignalSender, SignalingLink};
pub use protocol::{CandidateInit, SessionDescription, SignalMessage};
