use thiserror::Error;

/// Result type for DCM1 operations
pub type Result<T> = std::result::Result<T, Dcm1Error>;

/// Errors that can occur when talking to a DCM1 mixer
#[derive(Error, Debug)]
pub enum Dcm1Error {
    /// Socket could not be opened
    #[error("Connection failed: {0}")]
    Connection(#[source] std::io::Error),

    /// Socket open did not complete within the configured timeout
    #[error("Connection timeout")]
    ConnectTimeout,

    /// An established session failed mid-stream
    #[error("Transport lost: {0}")]
    TransportLost(String),

    /// Caller supplied an argument the device cannot accept
    #[error("Validation error: {0}")]
    Validation(String),

    /// The mixer has been disconnected and no longer accepts commands
    #[error("Mixer is not running")]
    NotRunning,

    /// A timer was needed but no Tokio runtime is reachable
    #[error("No Tokio runtime available")]
    NoRuntime,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl Dcm1Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Dcm1Error::Validation(message.into())
    }
}
