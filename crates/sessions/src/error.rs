use std::error::Error as StdError;

/// Crate-wide result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed session errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wire-level transport failure.
    #[error("messenger transport failed: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The sidecar rejected a pairing-code request.
    #[error("pairing request failed: {0}")]
    Pairing(String),

    /// The sidecar rejected a send.
    #[error("messenger send failed: {0}")]
    SendRejected(String),

    /// No response within the request timeout.
    #[error("messenger request timed out")]
    Timeout,

    /// The connection went away mid-request.
    #[error("messenger connection closed")]
    ConnectionClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] tether_store::Error),

    #[error(transparent)]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl Error {
    #[must_use]
    pub fn transport(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}
