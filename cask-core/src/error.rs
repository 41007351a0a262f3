//! Error taxonomy shared by every store operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaskError>;

#[derive(Debug, Error)]
pub enum CaskError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A manifest cites a chunk whose blob is missing or does not hash to its id.
    #[error("corruption: {0}")]
    Corruption(String),

    #[error("storage unavailable: {context}: {source}")]
    StorageUnavailable {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("retrieval handle expired at {0}")]
    Expired(String),
}

/// Stable, matchable classification of a [`CaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    Forbidden,
    Corruption,
    StorageUnavailable,
    InvalidInput,
    Expired,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Corruption => "corruption",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Expired => "expired",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaskError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            CaskError::NotFound(_) => ErrorKind::NotFound,
            CaskError::Forbidden(_) => ErrorKind::Forbidden,
            CaskError::Corruption(_) => ErrorKind::Corruption,
            CaskError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            CaskError::InvalidInput(_) => ErrorKind::InvalidInput,
            CaskError::Expired(_) => ErrorKind::Expired,
        }
    }

    /// Only backing-store failures are worth retrying; everything else is final.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageUnavailable
    }

    pub fn storage(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CaskError::StorageUnavailable { context: context.into(), source: source.into() }
    }
}

/// Attach a human-readable context to a backing-store failure.
pub(crate) trait StorageContext<T> {
    fn storage_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> StorageContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage_context<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| CaskError::storage(f(), e))
    }
}
