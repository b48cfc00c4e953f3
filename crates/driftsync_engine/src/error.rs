//! Error types for the synchronization engine.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the synchronization engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed batch, count mismatch, or bad query parameter.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown project, device, session, or conflict id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cross-tenant access.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Durable write failed. Safe to retry the identical batch; the
    /// idempotency cache and the change-log dedup absorb the retry.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    /// Returns true if this is a client error (4xx-class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidRequest(_) | EngineError::NotFound(_) | EngineError::Forbidden(_)
        )
    }

    /// Returns true if this is a server error (5xx-class).
    pub fn is_server_error(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(EngineError::InvalidRequest("bad".into()).is_client_error());
        assert!(EngineError::NotFound("project-1".into()).is_client_error());
        assert!(EngineError::Forbidden("tenant".into()).is_client_error());
        assert!(EngineError::Persistence("disk".into()).is_server_error());
        assert!(!EngineError::Persistence("disk".into()).is_client_error());
    }

    #[test]
    fn error_display() {
        let err = EngineError::NotFound("device device-a".into());
        assert_eq!(err.to_string(), "not found: device device-a");
    }
}
