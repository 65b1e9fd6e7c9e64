//! # EntiDB Sync Protocol
//!
//! Wire types, codecs, and durable queueing shared by the sync client and
//! server.
//!
//! This crate provides:
//! - [`Operation`] and [`ServerOperation`], the logical replication record (C1)
//! - [`Conflict`] and the named [`ConflictResolver`] constructors (C7)
//! - Protocol envelopes: handshake, pull, push, and structured errors (C5 payloads)
//! - [`OfflineQueue`], a durable FIFO of not-yet-acknowledged local operations (C3)
//! - [`DeltaCodec`], an optional field-level patch format (C10)
//!
//! This is a pure protocol crate; the only I/O is the offline queue's
//! append-only log over `entidb_storage`.
//!
//! ## Key Invariants
//!
//! - Operations are applied in commit order on both client and server.
//! - A pushed operation is accepted only if `entity_version` exceeds the
//!   server's current version for that entity; otherwise it surfaces as a
//!   [`Conflict`].
//! - Re-pushing an already-accepted operation (same
//!   `(db_id, device_id, op_id)`) is a no-op, not a duplicate.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod delta;
mod error;
mod messages;
mod operation;
mod queue;

pub use conflict::{
    client_wins, composite, custom, last_write_wins, server_wins, Conflict, ConflictResolver,
    ServerEntityState,
};
pub use delta::{DeltaCodec, Patch, PatchOp};
pub use error::{SyncProtocolError, SyncProtocolResult};
pub use messages::{
    ClientInfo, ErrorCode, ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest,
    PullResponse, PushRequest, PushResponse, ServerCapabilities, PROTOCOL_VERSION,
};
pub use operation::{Operation, OperationType, ServerOperation};
pub use queue::{OfflineQueue, OverflowPolicy, QueueStats, QueuedOperation};
