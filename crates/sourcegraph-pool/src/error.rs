//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no session cookies configured")]
    PoolEmpty,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
