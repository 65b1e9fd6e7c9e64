//! Request handlers for sync endpoints: device registry, and Handshake /
//! Pull / Push dispatch against a [`ServerOplog`] and [`BroadcastHub`],
//! per spec §4.6.

use crate::auth::{AuthConfig, Claims, TokenValidator};
use crate::broadcast::BroadcastHub;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::oplog::ServerOplog;
use entidb_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
    ServerCapabilities,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-device bookkeeping the spec's `devices` logical collection models:
/// `{registered_at, last_seen_at, cursor}`. Kept in memory rather than in
/// `entidb_core`, since nothing in §4.6 requires it to survive a restart —
/// the oplog and entity state do that durably; this is purely advisory.
#[derive(Debug, Clone, Copy)]
struct DeviceSession {
    registered_at: u64,
    last_seen_at: u64,
    cursor: u64,
}

/// Shared state behind one served database: its oplog, its broadcast hub,
/// and the device registry Handshake maintains.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    db_id: String,
    /// Server oplog (C6/C7), shared across all handlers for this database.
    pub oplog: Arc<ServerOplog>,
    /// Broadcast Hub (C8), shared across all handlers for this database.
    pub broadcast: Arc<BroadcastHub>,
    auth: Option<TokenValidator>,
    devices: RwLock<HashMap<String, DeviceSession>>,
}

impl HandlerContext {
    /// Creates a new handler context scoped to `db_id`.
    pub fn new(config: ServerConfig, db_id: impl Into<String>, oplog: Arc<ServerOplog>) -> Self {
        let auth = config
            .auth_secret
            .clone()
            .map(|secret| TokenValidator::new(AuthConfig::new(secret)));
        let broadcast = Arc::new(BroadcastHub::new(config.broadcast));
        Self { config, db_id: db_id.into(), oplog, broadcast, auth, devices: RwLock::new(HashMap::new()) }
    }

    fn check_db(&self, db_id: &str) -> ServerResult<()> {
        if db_id != self.db_id {
            return Err(ServerError::UnknownDatabase(db_id.to_string()));
        }
        Ok(())
    }

    fn touch_device(&self, device_id: &str, cursor: u64) {
        let now = crate::auth::now_millis();
        self.devices
            .write()
            .entry(device_id.to_string())
            .and_modify(|session| {
                session.last_seen_at = now;
                session.cursor = cursor;
            })
            .or_insert(DeviceSession { registered_at: now, last_seen_at: now, cursor });
    }

    /// Validates a bearer token against this context's configured secret.
    /// A no-op returning `Ok(None)` when `require_auth` is false.
    pub fn authenticate(&self, token: Option<&str>) -> ServerResult<Option<Claims>> {
        if !self.config.require_auth {
            return Ok(None);
        }
        let validator = self
            .auth
            .as_ref()
            .ok_or_else(|| ServerError::Internal("auth required but no secret configured".into()))?;
        let token = token
            .ok_or_else(|| ServerError::AuthenticationFailed("missing bearer token".into()))?;
        validator.validate_token(token).map(Some)
    }
}

/// Dispatches Handshake / Pull / Push requests against a [`HandlerContext`].
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// The handler's shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Handles a handshake request: validates protocol compatibility,
    /// registers/refreshes the device record, and returns the current
    /// cursor plus capability advertisement.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        self.context.check_db(&request.db_id)?;
        if request.protocol_version != entidb_sync_protocol::PROTOCOL_VERSION {
            return Err(ServerError::ProtocolMismatch(format!(
                "client speaks protocol version {}, server speaks {}",
                request.protocol_version,
                entidb_sync_protocol::PROTOCOL_VERSION
            )));
        }

        let cursor = self.context.oplog.cursor();
        self.context.touch_device(&request.device_id, cursor);

        let session_token = self.context.auth.as_ref().map(|validator| {
            validator.issue_token(&Claims {
                subject: request.device_id.clone(),
                device_id: Some(request.device_id.clone()),
                db_id: Some(request.db_id.clone()),
            })
        });

        Ok(HandshakeResponse {
            protocol_version: entidb_sync_protocol::PROTOCOL_VERSION,
            server_cursor: cursor,
            capabilities: ServerCapabilities { pull: true, push: true, channel_b: true },
            session_token,
        })
    }

    /// Handles a pull request: the ordered prefix of ops with
    /// `server_cursor > since_cursor`, optionally collection-filtered,
    /// capped at the server's configured batch size.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.context.check_db(&request.db_id)?;
        let limit = request.limit.min(self.context.config.max_pull_batch);
        let collections = request.collections.as_deref();

        let ops = self.context.oplog.operations_since(request.since_cursor, limit, collections)?;
        let next_cursor = ops.last().map(|op| op.server_cursor).unwrap_or(request.since_cursor);
        let has_more = self.context.oplog.has_more_after(next_cursor, collections)?;

        Ok(PullResponse { ops, next_cursor, has_more })
    }

    /// Handles a push request: accepts/conflicts each op per §4.6-4.7, then
    /// notifies the Broadcast Hub with whatever was newly accepted.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.context.check_db(&request.db_id)?;
        if request.ops.len() > self.context.config.max_push_batch as usize {
            return Err(ServerError::InvalidRequest(format!(
                "push batch of {} exceeds max_push_batch of {}",
                request.ops.len(),
                self.context.config.max_push_batch
            )));
        }

        let (acknowledged_up_to_op_id, conflicts, accepted) =
            self.context.oplog.push(&request.device_id, request.ops)?;

        if let Some(cursor) = accepted.last().map(|op| op.server_cursor) {
            self.context.broadcast.broadcast(&accepted, cursor);
        }

        Ok(PushResponse { acknowledged_up_to_op_id, conflicts })
    }
}
