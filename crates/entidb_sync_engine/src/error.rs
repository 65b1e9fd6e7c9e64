//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server rejected the request with a structured error.
    #[error("server error ({code}): {message}")]
    ServerError {
        /// The server's error code string, e.g. `"rate_limit_exceeded"`.
        code: String,
        /// Human-readable message from the server.
        message: String,
        /// Whether the server indicated this request should be retried.
        retryable: bool,
    },

    /// Local database error during sync.
    #[error("database error: {0}")]
    Database(#[from] entidb_core::CoreError),

    /// Local offline queue or wire codec error.
    #[error("protocol crate error: {0}")]
    SyncProtocol(#[from] entidb_sync_protocol::SyncProtocolError),

    /// Codec error decoding a server payload.
    #[error("codec error: {0}")]
    Codec(#[from] entidb_codec::CodecError),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Request exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The engine has not completed a handshake with the server yet.
    #[error("not connected to server")]
    NotConnected,

    /// Handshake reported a server the client cannot safely talk to.
    ///
    /// Always non-retryable: retrying an incompatible protocol version
    /// cannot succeed without a client update.
    #[error("protocol version mismatch")]
    VersionMismatch,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Builds an error from a decoded protocol error response.
    ///
    /// `VersionMismatch` gets its own variant rather than folding into
    /// `ServerError`: retrying it can never succeed without a client update,
    /// and callers may want to react to it specifically (e.g. prompt for an
    /// app update) rather than pattern-match on the error code string.
    pub fn from_server_error(error: &entidb_sync_protocol::ErrorResponse) -> Self {
        if error.code == entidb_sync_protocol::ErrorCode::VersionMismatch {
            return Self::VersionMismatch;
        }
        Self::ServerError {
            code: format!("{:?}", error.code),
            message: error.message.clone(),
            retryable: error.code.is_retryable(),
        }
    }

    /// Returns true if this error can be retried without client changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerError { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::VersionMismatch => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::VersionMismatch.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn server_error_retryability_follows_code() {
        let retryable = entidb_sync_protocol::ErrorResponse::new(
            entidb_sync_protocol::ErrorCode::RateLimitExceeded,
            "slow down",
        );
        assert!(SyncError::from_server_error(&retryable).is_retryable());

        let fatal = entidb_sync_protocol::ErrorResponse::new(
            entidb_sync_protocol::ErrorCode::AuthenticationFailed,
            "bad token",
        );
        assert!(!SyncError::from_server_error(&fatal).is_retryable());
    }

    #[test]
    fn version_mismatch_is_not_folded_into_server_error() {
        let response = entidb_sync_protocol::ErrorResponse::new(
            entidb_sync_protocol::ErrorCode::VersionMismatch,
            "upgrade required",
        );
        let err = SyncError::from_server_error(&response);
        assert!(matches!(err, SyncError::VersionMismatch));
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");
    }
}
