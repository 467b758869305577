use std::error::Error as StdError;

/// Crate-wide result type for policy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed policy errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote config could not be fetched and no cached value exists.
    #[error("remote config unavailable: {context}: {source}")]
    RemoteUnavailable {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn remote_unavailable(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::RemoteUnavailable {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
