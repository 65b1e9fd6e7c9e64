//! Error types for the sync protocol crate.

use entidb_codec::CodecError;
use entidb_storage::StorageError;
use thiserror::Error;

/// Result type for sync protocol operations.
pub type SyncProtocolResult<T> = Result<T, SyncProtocolError>;

/// Errors that can occur while encoding, decoding, or persisting sync state.
#[derive(Debug, Error)]
pub enum SyncProtocolError {
    /// The underlying durable log could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A durable log frame failed its checksum or framing invariant.
    #[error("offline queue corrupted: {0}")]
    QueueCorrupted(String),

    /// An operation referenced an op_id that is not present in the queue.
    #[error("unknown op_id {0} in offline queue")]
    UnknownOpId(u64),
}
