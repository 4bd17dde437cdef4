use std::time::Duration;

/// Transport-level failures. Service-level failures travel as non-200
/// result codes inside a [`crate::RockResponse`] and are not errors here.
#[derive(Debug, thiserror::Error)]
pub enum RockError {
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The connection is down; outstanding requests complete with this
    /// when the peer closes or the read loop hits an error.
    #[error("not connected")]
    NotConnected,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame of {len} bytes exceeds the {cap} byte cap")]
    FrameTooLarge { len: usize, cap: usize },

    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The bounded write queue is full; the caller should back off rather
    /// than block.
    #[error("write queue full")]
    QueueFull,

    #[error("encode body: {0}")]
    Body(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
