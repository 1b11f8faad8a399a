//! Error taxonomy shared across the grid.

use thiserror::Error;

/// Result type alias for grid operations.
pub type GridResult<T> = Result<T, GridError>;

/// Errors surfaced by the distributor, session map, and node clients.
#[derive(Debug, Error)]
pub enum GridError {
    /// No node could serve the request, the payload was empty, or the
    /// remote creation call failed.
    #[error("session not created: {0}")]
    SessionNotCreated(String),

    #[error("no such session: {0}")]
    NoSuchSession(String),

    /// Session map backend I/O failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Startup-time failure to initialize a backend.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}
