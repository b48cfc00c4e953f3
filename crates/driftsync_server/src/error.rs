//! Server error types.

use driftsync_engine::EngineError;
use thiserror::Error;

/// Convenience result alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by server entry points.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The engine rejected or failed the interaction.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A live connection was refused before registration.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
}

impl ServerError {
    /// Returns true if the error is the caller's fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Engine(err) => err.is_client_error(),
            Self::ConnectionRefused(_) => true,
        }
    }

    /// Returns true if the error is the server's fault.
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }
}
