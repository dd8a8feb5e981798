//! Error types and handling for gridmesh

use thiserror::Error;

/// Result type alias for gridmesh operations
pub type Result<T> = std::result::Result<T, Error>;

/// gridmesh error types
///
/// An unreachable route is not an error: `RouteResult` carries a `found`
/// discriminator and the routing call itself succeeds.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("persistence unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("JSON error: {}", err))
    }
}
