//! Session negotiation and lifecycle

mod conductor;

pub use conductor::{NegotiationState, SessionConductor};
