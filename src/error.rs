//! Error types for the Dynastat console client

/// Result type alias using the console Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or streaming device state
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling relay error (message could not be sent or parsed)
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket-level error on the relay connection
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// SDP negotiation error (offer/answer creation or application)
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Telemetry frame could not be decoded
    #[error("Telemetry decode error: {0}")]
    DecodeError(String),

    /// Operation attempted from an invalid negotiation state
    #[error("Invalid negotiation state: {0}")]
    InvalidState(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable by re-invoking the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_) | Error::WebSocketError(_) | Error::IoError(_)
        )
    }

    /// Check if this error ends the session (relay lost, transport dead)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::WebSocketError(_) | Error::WebRtcError(_))
    }
}
