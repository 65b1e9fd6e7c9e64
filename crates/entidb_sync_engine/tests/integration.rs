//! Integration tests wiring the client sync engine directly against the
//! sync server, with no network in between.

use entidb_core::{Database, EntityId};
use entidb_sync_engine::state::MemorySyncApplier;
use entidb_sync_engine::{DatabaseApplier, SyncConfig, SyncEngine, SyncError, SyncResult, SyncTransport};
use entidb_sync_protocol::{
    HandshakeRequest, HandshakeResponse, Operation, PullRequest, PullResponse, PushRequest, PushResponse,
};
use entidb_sync_server::{ServerConfig, ServerOplog, SyncServer};
use std::sync::Arc;

/// Drives a [`SyncServer`] in-process, as if it were a transport.
struct InMemoryTransport {
    server: Arc<SyncServer>,
}

impl InMemoryTransport {
    fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }
}

impl SyncTransport for InMemoryTransport {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.server
            .handle_handshake(request.clone())
            .map_err(|e| SyncError::from_server_error(&e.to_error_response()))
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.server
            .handle_pull(request.clone())
            .map_err(|e| SyncError::from_server_error(&e.to_error_response()))
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.server
            .handle_push(request.clone())
            .map_err(|e| SyncError::from_server_error(&e.to_error_response()))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}

fn make_op(op_id: u64, device_id: &str, entity_id: &str, version: u64) -> Operation {
    Operation::upsert(op_id, "db1", device_id, "notes", entity_id, version, vec![0x01, op_id as u8], 1_000)
}

#[test]
fn client_server_full_sync() {
    let server = Arc::new(SyncServer::in_memory(ServerConfig::default(), "db1").unwrap());
    let transport = InMemoryTransport::new(Arc::clone(&server));

    let applier = MemorySyncApplier::new();
    applier.add_pending(make_op(1, "dev1", "n1", 1));
    applier.add_pending(make_op(2, "dev1", "n2", 1));

    let config = SyncConfig::new("db1", "dev1", "memory://");
    let engine = SyncEngine::new(config, transport, applier);

    let result = engine.sync().unwrap();
    assert!(result.success);
    assert_eq!(result.pushed, 2);
    assert!(result.conflicts.is_empty());
    assert_eq!(server.operation_count(), 2);
}

#[test]
fn bidirectional_sync() {
    let database = Arc::new(Database::open_in_memory().unwrap());
    let oplog = Arc::new(ServerOplog::new(database).unwrap());
    let server = Arc::new(SyncServer::with_oplog(ServerConfig::default(), "db1", Arc::clone(&oplog)));

    // dev1 pushes one change.
    let dev1_applier = MemorySyncApplier::new();
    dev1_applier.add_pending(make_op(1, "dev1", "n1", 1));
    let dev1_engine = SyncEngine::new(
        SyncConfig::new("db1", "dev1", "memory://"),
        InMemoryTransport::new(Arc::clone(&server)),
        dev1_applier,
    );
    let result = dev1_engine.sync().unwrap();
    assert_eq!(result.pushed, 1);

    // dev2 should see it on its next pull.
    let dev2_applier = MemorySyncApplier::new();
    let dev2_engine = SyncEngine::new(
        SyncConfig::new("db1", "dev2", "memory://"),
        InMemoryTransport::new(Arc::clone(&server)),
        dev2_applier,
    );
    let result = dev2_engine.sync().unwrap();
    assert_eq!(result.pulled, 1);

    let pull = server
        .handle_pull(PullRequest { db_id: "db1".into(), since_cursor: 0, limit: 10, collections: None })
        .unwrap();
    assert_eq!(pull.ops.len(), 1);
    assert_eq!(pull.ops[0].op.entity_id, "n1");
}

#[test]
fn empty_sync() {
    let server = Arc::new(SyncServer::in_memory(ServerConfig::default(), "db1").unwrap());
    let transport = InMemoryTransport::new(Arc::clone(&server));
    let applier = MemorySyncApplier::new();

    let engine = SyncEngine::new(SyncConfig::new("db1", "dev1", "memory://"), transport, applier);
    let result = engine.sync().unwrap();

    assert!(result.success);
    assert_eq!(result.pulled, 0);
    assert_eq!(result.pushed, 0);
    assert!(result.conflicts.is_empty());
}

#[test]
fn database_applier_sync() {
    let server = Arc::new(SyncServer::in_memory(ServerConfig::default(), "db1").unwrap());
    let transport = InMemoryTransport::new(Arc::clone(&server));

    let local_db = Arc::new(Database::open_in_memory().unwrap());
    let applier = DatabaseApplier::in_memory(Arc::clone(&local_db), 100);
    let entity_id = EntityId::new().to_uuid().to_string();
    applier
        .record_local_change("db1", "dev1", "notes", entity_id, 1, Some(vec![0xAB]), 1_000)
        .unwrap();

    let engine = SyncEngine::new(SyncConfig::new("db1", "dev1", "memory://"), transport, applier);
    let result = engine.sync().unwrap();

    assert_eq!(result.pushed, 1);
    assert_eq!(server.operation_count(), 1);
}

#[test]
fn database_applier_pull_persists() {
    let server = Arc::new(SyncServer::in_memory(ServerConfig::default(), "db1").unwrap());

    // Another device pushes directly through the server.
    let remote_entity = EntityId::new();
    let remote_id = remote_entity.to_uuid().to_string();
    let push = PushRequest {
        db_id: "db1".into(),
        device_id: "dev-remote".into(),
        ops: vec![make_op(1, "dev-remote", &remote_id, 1)],
    };
    server.handle_push(push).unwrap();

    let local_db = Arc::new(Database::open_in_memory().unwrap());
    let applier = DatabaseApplier::in_memory(Arc::clone(&local_db), 100);
    let transport = InMemoryTransport::new(Arc::clone(&server));
    let engine = SyncEngine::new(SyncConfig::new("db1", "dev1", "memory://"), transport, applier);

    let result = engine.sync().unwrap();
    assert_eq!(result.pulled, 1);

    let collection_id = local_db.create_collection("notes").unwrap();
    assert_eq!(local_db.get(collection_id, remote_entity).unwrap(), Some(vec![0x01, 1]));
}
