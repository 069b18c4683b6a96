//! Error types for upstream transport operations

/// Errors from the completions transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream timed out after {0} seconds")]
    Timeout(u64),

    #[error("failed to serialize completion payload: {0}")]
    Serialize(String),

    #[error("upstream stream error: {0}")]
    Stream(String),
}

impl Error {
    /// Stable kind label for metrics and error envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Request(_) => "request",
            Error::Timeout(_) => "timeout",
            Error::Serialize(_) => "serialize",
            Error::Stream(_) => "stream",
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
