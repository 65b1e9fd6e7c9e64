//! Main sync server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::oplog::ServerOplog;
use entidb_core::Database;
use entidb_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};
use std::sync::Arc;

/// The sync server.
///
/// Handles synchronization requests from clients using the EntiDB sync
/// protocol. Wraps a [`ServerOplog`] (durable, `entidb_core`-backed) and a
/// [`crate::broadcast::BroadcastHub`] behind Handshake/Pull/Push dispatch;
/// an outer transport (HTTP, in-process, or whatever the deployment uses)
/// drives these methods from incoming requests.
///
/// # Example
///
/// ```
/// use entidb_sync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::in_memory(ServerConfig::default(), "my-db").unwrap();
/// assert_eq!(server.cursor(), 0);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a server for `db_id` backed by an ephemeral in-memory
    /// database (tests, or clients that accept losing server state on
    /// restart).
    pub fn in_memory(config: ServerConfig, db_id: impl Into<String>) -> ServerResult<Self> {
        let database = Arc::new(Database::open_in_memory().map_err(crate::error::ServerError::Database)?);
        let oplog = Arc::new(ServerOplog::new(database)?);
        Ok(Self::with_oplog(config, db_id, oplog))
    }

    /// Creates a sync server with an existing, possibly already-populated
    /// oplog (e.g. recovered from a durable database on restart).
    pub fn with_oplog(config: ServerConfig, db_id: impl Into<String>, oplog: Arc<ServerOplog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, db_id, oplog));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a handshake request.
    pub fn handle_handshake(&self, request: HandshakeRequest) -> ServerResult<HandshakeResponse> {
        self.handler.handle_handshake(request)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, request: PullRequest) -> ServerResult<PullResponse> {
        self.handler.handle_pull(request)
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(request)
    }

    /// The handler context backing this server, for wiring up a transport
    /// or subscribing to the Broadcast Hub directly.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Returns the current server cursor.
    pub fn cursor(&self) -> u64 {
        self.context.oplog.cursor()
    }

    /// Returns the number of operations in the oplog.
    pub fn operation_count(&self) -> usize {
        self.context.oplog.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_sync_protocol::{ClientInfo, Operation};

    fn make_op(op_id: u64, entity_id: &str) -> Operation {
        Operation::upsert(op_id, "db1", "dev1", "notes", entity_id, 1, vec![0x42], 1_000)
    }

    #[test]
    fn server_lifecycle() {
        let server = SyncServer::in_memory(ServerConfig::default(), "db1").unwrap();
        assert_eq!(server.cursor(), 0);
        assert_eq!(server.operation_count(), 0);
    }

    #[test]
    fn full_sync_flow() {
        let server = SyncServer::in_memory(ServerConfig::default(), "db1").unwrap();

        let handshake = HandshakeRequest::new("db1", "dev1", ClientInfo::default());
        let response = server.handle_handshake(handshake).unwrap();
        let server_cursor = response.server_cursor;
        assert_eq!(server_cursor, 0);

        let pull = PullRequest { db_id: "db1".into(), since_cursor: 0, limit: 10, collections: None };
        let response = server.handle_pull(pull).unwrap();
        assert!(response.ops.is_empty());

        let push = PushRequest {
            db_id: "db1".into(),
            device_id: "dev1".into(),
            ops: vec![make_op(1, "n1"), make_op(2, "n2")],
        };
        let response = server.handle_push(push).unwrap();
        assert_eq!(response.acknowledged_up_to_op_id, 2);
        assert!(response.conflicts.is_empty());

        let pull = PullRequest { db_id: "db1".into(), since_cursor: 0, limit: 10, collections: None };
        let response = server.handle_pull(pull).unwrap();
        assert_eq!(response.ops.len(), 2);
    }

    #[test]
    fn shared_oplog() {
        let database = Arc::new(Database::open_in_memory().unwrap());
        let oplog = Arc::new(ServerOplog::new(database).unwrap());
        let server = SyncServer::with_oplog(ServerConfig::default(), "db1", Arc::clone(&oplog));

        let push = PushRequest { db_id: "db1".into(), device_id: "dev1".into(), ops: vec![make_op(1, "n1")] };
        server.handle_push(push).unwrap();

        assert_eq!(oplog.len(), 1);
    }
}
