//! Error types for the sync server.

use entidb_core::CoreError;
use entidb_sync_protocol::{ErrorCode, ErrorResponse};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request body failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Caller's credentials were missing or rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Caller is authenticated but not permitted for this database.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// `db_id` has no corresponding database on the server.
    #[error("unknown database: {0:?}")]
    UnknownDatabase(String),

    /// Caller's protocol version is incompatible.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// Caller is being throttled.
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited {
        /// Suggested backoff before retrying.
        retry_after_seconds: u32,
    },

    /// The underlying store rejected the operation.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// Unexpected server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Maps this error to its stable wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ServerError::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
            ServerError::NotAuthorized(_) => ErrorCode::AuthorizationFailed,
            ServerError::UnknownDatabase(_) => ErrorCode::DatabaseNotFound,
            ServerError::ProtocolMismatch(_) => ErrorCode::VersionMismatch,
            ServerError::RateLimited { .. } => ErrorCode::RateLimitExceeded,
            ServerError::Database(_) | ServerError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Builds the structured wire body a handler sends back for this error.
    pub fn to_error_response(&self) -> ErrorResponse {
        let mut response = ErrorResponse::new(self.code(), self.to_string());
        if let ServerError::RateLimited { retry_after_seconds } = self {
            response.retry_after_seconds = Some(*retry_after_seconds);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_category() {
        assert_eq!(ServerError::InvalidRequest("bad".into()).code(), ErrorCode::InvalidRequest);
        assert_eq!(ServerError::Internal("oops".into()).code(), ErrorCode::InternalError);
        assert!(ServerError::RateLimited { retry_after_seconds: 5 }.code().is_retryable());
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let err = ServerError::RateLimited { retry_after_seconds: 30 };
        let response = err.to_error_response();
        assert_eq!(response.retry_after_seconds, Some(30));
        assert_eq!(response.code, ErrorCode::RateLimitExceeded);
    }

    #[test]
    fn display_is_human_readable() {
        let err = ServerError::UnknownDatabase("db-xyz".into());
        assert!(err.to_string().contains("db-xyz"));
    }
}
