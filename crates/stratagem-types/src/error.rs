//! Shared error types used across Stratagem crates.

use thiserror::Error;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Errors from the authorization RPC.
///
/// These are transport-level failures, not denials; a denial is a
/// successful RPC whose answer is `false`.
#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("authorization rpc unreachable: {0}")]
    Transport(String),

    #[error("authorization rpc returned status {0}")]
    Status(u16),

    #[error("authorization rpc response malformed: {0}")]
    Decode(String),
}

/// Errors from ontology context assembly.
#[derive(Debug, Error)]
pub enum ContextLoadError {
    #[error("context query failed: {0}")]
    Query(String),

    #[error("context target not found: {0}")]
    TargetMissing(String),
}

/// Errors from the upstream agent orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator unreachable: {0}")]
    Connect(String),

    #[error("orchestrator returned status {0}")]
    Status(u16),

    #[error("orchestrator stream failed: {0}")]
    Stream(String),

    #[error("orchestrator event malformed: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::NotFound("session abc".to_string());
        assert_eq!(err.to_string(), "entity not found: session abc");
    }

    #[test]
    fn test_authz_error_display() {
        let err = AuthzError::Status(503);
        assert_eq!(err.to_string(), "authorization rpc returned status 503");
    }

    #[test]
    fn test_orchestrator_error_display() {
        let err = OrchestratorError::Decode("missing type tag".to_string());
        assert_eq!(
            err.to_string(),
            "orchestrator event malformed: missing type tag"
        );
    }
}
