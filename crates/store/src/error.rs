/// Crate-wide result type for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed storage errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem read/write failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// A blocking storage task was cancelled or panicked.
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Filesystem watcher setup failed.
    #[error(transparent)]
    Watch(#[from] notify_debouncer_full::notify::Error),
}
