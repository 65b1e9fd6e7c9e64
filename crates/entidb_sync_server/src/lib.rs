//! # EntiDB Sync Server
//!
//! Server-side half of the sync core: Server Oplog & Store with Conflict
//! Detector (C6 + C7), and the Broadcast Hub (C8) that fans accepted
//! operations out to live subscriptions.
//!
//! This crate provides:
//! - A durable, `entidb_core`-backed oplog with per-operation idempotency
//!   and strict version-based conflict detection
//! - A subscription registry with per-device and total capacity limits
//! - Bearer-token authentication
//! - Handshake/Pull/Push request dispatch

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod handler;
pub mod oplog;
pub mod server;
pub mod transport;

pub use auth::{AuthConfig, Claims, TokenValidator};
pub use broadcast::{BroadcastConfig, BroadcastError, BroadcastHub, BroadcastSink, SubscriptionId};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use oplog::ServerOplog;
pub use server::SyncServer;
pub use transport::serve_tcp;
