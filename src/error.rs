use thiserror::Error;

/// Signalling client errors
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Transport-level failure, fatal to the channel.
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation issued without a live connection.
    #[error("not connected")]
    NotConnected,

    /// Operation issued before the state it depends on exists.
    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    /// Malformed or out-of-order server message.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("producer not found: {0}")]
    ProducerNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SignalingError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SignalingError::Connection(e.to_string())
    }
}
