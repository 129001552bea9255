//! WebRTC console client for the Dynastat pressure-sensing platform
//!
//! Negotiates a peer session with the device over a WebSocket signaling
//! relay, then streams device telemetry and motor commands over two data
//! channels with different delivery contracts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Signaling relay (WebSocket)                         │
//! │  ↕ offer / answer / ICE candidates                   │
//! │  SignalingLink ──→ SessionConductor                  │
//! │                    ├─ "data" channel (unreliable)    │
//! │                    │   msgpack frames → DeviceModel  │
//! │                    │   → render task → Renderer      │
//! │                    └─ "command" channel (reliable)   │
//! │                        JSON command envelopes        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use dynastat_console::ConsoleConfig;
//!
//! let config = ConsoleConfig::for_device("http://dynastat.local:8000", "test");
//! assert!(config.validate().is_ok());
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod session;
pub mod signaling;
pub mod telemetry;

// Re-exports for public API
pub use config::{ConsoleConfig, LayoutConfig, MotorBounds, RegionConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use events::ConsoleEvent;
pub use model::{DeviceModel, RenderCell, Renderer};
pub use session::{NegotiationState, SessionConductor};
pub use signaling::{LinkEvent, SignalMessage, SignalSender, SignalingLink};
pub use telemetry::{Cmd, DeviceUpdate};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
