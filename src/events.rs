//! Console event types
//!
//! UI-facing side effects flow from the conductor and the device model to
//! whatever front end hosts them, over an mpsc channel. The library emits
//! these events but never owns their presentation.

/// Events emitted toward the hosting UI
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// The remote answer was applied; command controls may be enabled.
    /// Emitted exactly once per successful negotiation.
    ControlsEnabled,

    /// Negotiation failed or timed out while waiting for an answer
    NegotiationFailed {
        /// Human-readable failure reason
        reason: String,
    },

    /// The signaling relay connection closed abnormally (fatal)
    SignalingLost {
        /// Close code reported by the relay connection
        code: u16,
        /// Human-readable close reason
        reason: String,
    },

    /// Telemetry frames decoded during the last observation interval
    TelemetryRate {
        /// Frames per interval (interval is one second)
        frames: u64,
    },

    /// A motor readout changed; `text` is already scaled to the motor's
    /// declared widget bounds
    MotorReadout {
        /// Motor name as reported by the device
        name: String,
        /// Scaled, precision-formatted current position
        text: String,
    },
}

impl ConsoleEvent {
    /// Create a negotiation failure event
    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a signaling-lost event
    pub fn signaling_lost(code: u16, reason: impl Into<String>) -> Self {
        Self::SignalingLost {
            code,
            reason: reason.into(),
        }
    }

    /// Get the event name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::ControlsEnabled => "controls_enabled",
            Self::NegotiationFailed { .. } => "negotiation_failed",
            Self::SignalingLost { .. } => "signaling_lost",
            Self::TelemetryRate { .. } => "telemetry_rate",
            Self::MotorReadout { .. } => "motor_readout",
        }
    }
}
