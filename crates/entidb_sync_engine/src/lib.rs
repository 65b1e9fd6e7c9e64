//! # EntiDB Sync Engine
//!
//! Client-side sync engine for EntiDB: the WAL observer (C2), client sync
//! state machine (C4), transport adapter (C5), and auto-sync coordinator
//! (C9) described in the sync core specification.
//!
//! This crate provides:
//! - A WAL observer that turns local commits into queued sync operations
//! - A durable-queue-backed [`db_applier::DatabaseApplier`]
//! - The sync state machine (idle → pulling → pushing → synced)
//! - Channel A (request/response) and Channel B (long-lived bidirectional)
//!   transport adapters
//! - The auto-sync coordinator, with debounced/periodic/explicit triggers
//!   and latched-error retry

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod channel_b;
pub mod config;
pub mod coordinator;
pub mod db_applier;
pub mod error;
pub mod http;
pub mod state;
pub mod transport;
pub mod wal_observer;

pub use channel_b::{BidiChannel, ChannelBError, ChannelBMessage, KeepaliveConfig, LoopbackBidiChannel, ReconnectConfig};
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorState, CoordinatorStats};
pub use db_applier::DatabaseApplier;
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpError, HttpTransport};
pub use state::{SyncApplier, SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MockTransport, SyncTransport};
pub use wal_observer::WalObserver;
