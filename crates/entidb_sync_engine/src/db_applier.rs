//! Database-backed sync applier (C4 + C3 integration).
//!
//! Bridges the sync core's string-typed identifiers (`db_id`, `collection`,
//! `entity_id`) to `entidb_core`'s UUID/u32 identifier space only at this
//! boundary: `Database::create_collection` maps collection names to
//! `CollectionId`s, and an entity's protocol-level string id is exactly the
//! canonical string form of its `entidb_core::EntityId` (a UUID). That keeps
//! the mapping round-trippable in both directions: the applier parses an
//! incoming string id back into the `EntityId` the server and the local WAL
//! agree on, and [`crate::wal_observer`] goes the other way, turning a raw
//! `EntityId` observed in the WAL back into the same string. Everything
//! above this module — protocol, engine, transport — stays string-typed.

use crate::error::{SyncError, SyncResult};
use crate::state::SyncApplier;
use entidb_core::{CollectionId, Database, EntityId};
use entidb_sync_protocol::{Conflict, Operation, OperationType, OverflowPolicy, ServerOperation};
use entidb_storage::{InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SYNC_META_COLLECTION: &str = "_sync_meta";

/// Fixed entity id the `_sync_meta` collection stores the server cursor
/// under. A nil UUID rather than a derived one: this is the one entity in
/// the whole scheme that isn't a stringified application entity id.
const CURSOR_ENTITY: EntityId = EntityId::from_bytes([0u8; 16]);

/// Parses a protocol-level entity id string back into the `EntityId` it
/// names.
///
/// Returns a `Protocol` error rather than panicking: a malformed id here
/// means a buggy or malicious peer, not a local invariant violation.
pub(crate) fn parse_entity_id(entity_id: &str) -> SyncResult<EntityId> {
    Uuid::parse_str(entity_id)
        .map(EntityId::from_uuid)
        .map_err(|e| SyncError::Protocol(format!("invalid entity id {entity_id:?}: {e}")))
}

/// Renders an `EntityId` as the string the protocol layer uses for it.
pub(crate) fn entity_id_to_string(id: EntityId) -> String {
    id.to_uuid().to_string()
}

/// A sync applier backed by an EntiDB database and a durable offline queue.
///
/// - Remote operations are applied to the target collection in a single
///   transaction.
/// - Local pending operations live in an [`entidb_sync_protocol::OfflineQueue`]
///   rather than an in-memory `Vec`, so they survive a restart between sync
///   cycles.
/// - The server cursor is stored as an entity in a hidden `_sync_meta`
///   collection, consistent with how the rest of the core stores metadata
///   inside the same storage engine it manages.
pub struct DatabaseApplier<B: StorageBackend> {
    database: Arc<Database>,
    queue: Mutex<entidb_sync_protocol::OfflineQueue<B>>,
    next_op_id: AtomicU64,
}

impl DatabaseApplier<InMemoryBackend> {
    /// Creates an applier with an in-memory offline queue (for tests or
    /// ephemeral clients that accept losing unsent operations on restart).
    pub fn in_memory(database: Arc<Database>, capacity: usize) -> Self {
        let queue = entidb_sync_protocol::OfflineQueue::in_memory(capacity, OverflowPolicy::RejectNew);
        Self::from_parts(database, queue)
    }
}

impl<B: StorageBackend> DatabaseApplier<B> {
    fn from_parts(database: Arc<Database>, queue: entidb_sync_protocol::OfflineQueue<B>) -> Self {
        let next_op_id = queue
            .get_pending(usize::MAX)
            .iter()
            .map(|q| q.op.op_id)
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            database,
            queue: Mutex::new(queue),
            next_op_id: AtomicU64::new(next_op_id),
        }
    }

    /// Creates an applier from an already-open offline queue.
    pub fn new(database: Arc<Database>, queue: entidb_sync_protocol::OfflineQueue<B>) -> Self {
        Self::from_parts(database, queue)
    }

    /// Gets the underlying database.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    fn meta_collection(&self) -> SyncResult<CollectionId> {
        self.database
            .create_collection(SYNC_META_COLLECTION)
            .map_err(SyncError::Database)
    }

    /// Records a locally-committed change for the sync engine to push.
    ///
    /// Called by whatever observes local writes (the WAL observer, in the
    /// full pipeline); exposed here so tests and simple integrations can
    /// drive the applier directly.
    pub fn record_local_change(
        &self,
        db_id: impl Into<String>,
        device_id: impl Into<String>,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        entity_version: u64,
        entity_cbor: Option<Vec<u8>>,
        timestamp_ms: i64,
    ) -> SyncResult<()> {
        let op_id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        let db_id = db_id.into();
        let device_id = device_id.into();
        let collection = collection.into();
        let entity_id = entity_id.into();
        let op = match entity_cbor {
            Some(cbor) => Operation::upsert(
                op_id,
                db_id,
                device_id,
                collection,
                entity_id,
                entity_version,
                cbor,
                timestamp_ms,
            ),
            None => Operation::delete(op_id, db_id, device_id, collection, entity_id, entity_version, timestamp_ms),
        };
        self.queue.lock().enqueue(op)?;
        Ok(())
    }
}

impl<B: StorageBackend> SyncApplier for DatabaseApplier<B> {
    fn apply_remote_operations(&self, operations: &[ServerOperation]) -> SyncResult<()> {
        if operations.is_empty() {
            return Ok(());
        }

        let resolved = operations
            .iter()
            .map(|server_op| {
                let op = &server_op.op;
                let collection_id = self
                    .database
                    .create_collection(&op.collection)
                    .map_err(SyncError::Database)?;
                let entity_id = parse_entity_id(&op.entity_id)?;
                Ok((collection_id, entity_id, op))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        self.database
            .transaction(|txn| {
                for (collection_id, entity_id, op) in &resolved {
                    match op.op_type {
                        OperationType::Upsert => {
                            if let Some(cbor) = &op.entity_cbor {
                                txn.put(*collection_id, *entity_id, cbor.clone())?;
                            }
                        }
                        OperationType::Delete => {
                            txn.delete(*collection_id, *entity_id)?;
                        }
                    }
                }
                Ok(())
            })
            .map_err(SyncError::Database)?;

        Ok(())
    }

    fn get_pending_operations(&self, limit: u32) -> SyncResult<Vec<Operation>> {
        Ok(self
            .queue
            .lock()
            .get_pending(limit as usize)
            .into_iter()
            .map(|q| q.op)
            .collect())
    }

    fn acknowledge_operations(&self, up_to_op_id: u64) -> SyncResult<()> {
        let mut queue = self.queue.lock();
        let ids: Vec<u64> = queue
            .get_pending(usize::MAX)
            .into_iter()
            .map(|q| q.op.op_id)
            .filter(|id| *id <= up_to_op_id)
            .collect();
        for id in ids {
            queue.acknowledge(id)?;
        }
        Ok(())
    }

    fn get_server_cursor(&self) -> SyncResult<u64> {
        let collection_id = self.meta_collection()?;
        let cursor = self
            .database
            .get(collection_id, CURSOR_ENTITY)
            .map_err(SyncError::Database)?
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .map(u64::from_le_bytes)
            .unwrap_or(0);
        Ok(cursor)
    }

    fn set_server_cursor(&self, cursor: u64) -> SyncResult<()> {
        let collection_id = self.meta_collection()?;
        self.database
            .transaction(|txn| {
                txn.put(collection_id, CURSOR_ENTITY, cursor.to_le_bytes().to_vec())?;
                Ok(())
            })
            .map_err(SyncError::Database)?;
        Ok(())
    }

    fn resolve_conflict(&self, conflict: &Conflict, resolution: Option<Operation>) -> SyncResult<()> {
        let mut queue = self.queue.lock();
        queue.acknowledge(conflict.client_op.op_id)?;
        if let Some(mut retry_op) = resolution {
            retry_op.op_id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
            queue.enqueue(retry_op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::Database;

    fn create_applier() -> DatabaseApplier<InMemoryBackend> {
        let db = Database::open_in_memory().unwrap();
        DatabaseApplier::in_memory(Arc::new(db), 100)
    }

    #[test]
    fn cursor_round_trips_through_database() {
        let applier = create_applier();
        assert_eq!(applier.get_server_cursor().unwrap(), 0);

        applier.set_server_cursor(42).unwrap();
        assert_eq!(applier.get_server_cursor().unwrap(), 42);
    }

    #[test]
    fn pending_operations_survive_acknowledge() {
        let applier = create_applier();
        let (n1, n2) = (entity_id_to_string(EntityId::new()), entity_id_to_string(EntityId::new()));

        applier
            .record_local_change("db1", "dev1", "notes", n1, 1, Some(vec![1]), 1_000)
            .unwrap();
        applier
            .record_local_change("db1", "dev1", "notes", n2.clone(), 1, Some(vec![2]), 1_001)
            .unwrap();

        let pending = applier.get_pending_operations(10).unwrap();
        assert_eq!(pending.len(), 2);

        applier.acknowledge_operations(pending[0].op_id).unwrap();
        let pending = applier.get_pending_operations(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, n2);
    }

    #[test]
    fn apply_remote_upsert_and_delete() {
        let applier = create_applier();
        let n1 = entity_id_to_string(EntityId::new());

        let upsert = ServerOperation {
            server_cursor: 1,
            source_device_id: "dev2".into(),
            source_op_id: 1,
            op: Operation::upsert(1, "db1", "dev2", "notes", n1.clone(), 1, vec![0xCA, 0xFE], 1_000),
        };
        applier.apply_remote_operations(&[upsert]).unwrap();

        let collection_id = applier.database().create_collection("notes").unwrap();
        let entity_id = parse_entity_id(&n1).unwrap();
        assert_eq!(
            applier.database().get(collection_id, entity_id).unwrap(),
            Some(vec![0xCA, 0xFE])
        );

        let delete = ServerOperation {
            server_cursor: 2,
            source_device_id: "dev2".into(),
            source_op_id: 2,
            op: Operation::delete(2, "db1", "dev2", "notes", n1, 2, 1_001),
        };
        applier.apply_remote_operations(&[delete]).unwrap();
        assert_eq!(applier.database().get(collection_id, entity_id).unwrap(), None);
    }

    #[test]
    fn resolve_conflict_drops_original_and_enqueues_retry() {
        let applier = create_applier();
        let n1 = entity_id_to_string(EntityId::new());
        applier
            .record_local_change("db1", "dev1", "notes", n1.clone(), 1, Some(vec![1]), 1_000)
            .unwrap();
        let original = applier.get_pending_operations(1).unwrap().remove(0);

        let conflict = Conflict {
            collection: "notes".into(),
            entity_id: n1,
            client_op: original.clone(),
            server_state: entidb_sync_protocol::ServerEntityState {
                entity_version: 5,
                entity_cbor: Some(vec![9]),
                last_modified: 2_000,
            },
        };

        let mut retry = original.clone();
        retry.entity_version = 6;
        applier.resolve_conflict(&conflict, Some(retry)).unwrap();

        let pending = applier.get_pending_operations(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].op_id, original.op_id);
        assert_eq!(pending[0].entity_version, 6);
    }
}
