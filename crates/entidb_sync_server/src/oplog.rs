//! Server Oplog & Store (C6) and Conflict Detector (C7).
//!
//! Backed by the same `entidb_core::Database` engine clients use, per
//! spec §4.6's "out-of-scope detail, same embedded database engine" framing
//! (grounded in `entidb_sync_engine::db_applier`, which does the client-side
//! half of the same string-id-over-`entidb_core` mapping). The spec's
//! logical `entities`/`server_ops`/`devices`/`meta` schema is realized as
//! three hidden collections, since `entidb_core` only exposes a flat
//! collection/entity-id keyspace rather than secondary indexes:
//!
//! - `_server_ops`: keyed by a deterministic id derived from `server_cursor`,
//!   holds the encoded [`ServerOperation`].
//! - `_entity_state`: keyed by a deterministic id derived from
//!   `(collection, entity_id)`, holds the latest [`ServerEntityState`] plus
//!   enough bookkeeping to recover the next cursor on reopen.
//! - `_idempotency`: keyed by a deterministic id derived from
//!   `(source_device_id, source_op_id)`, holds the `server_cursor` it was
//!   first accepted at. `db_id` isn't part of the key because one
//!   `ServerOplog` is already scoped to a single database, mirroring how
//!   `entidb_core::Database` itself is single-database.
//!
//! Push acceptance is serialized end to end with an internal mutex: the
//! idempotency probe, conflict check, and cursor allocation must all
//! observe a consistent view, which a bare `database.transaction` call
//! alone wouldn't guarantee across the read-then-write sequence.

use crate::error::{ServerError, ServerResult};
use entidb_core::{CollectionId, Database, EntityId};
use entidb_sync_protocol::{Conflict, Operation, OperationType, ServerEntityState, ServerOperation};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

const SERVER_OPS_COLLECTION: &str = "_server_ops";
const ENTITY_STATE_COLLECTION: &str = "_entity_state";
const IDEMPOTENCY_COLLECTION: &str = "_idempotency";

fn cursor_entity_id(cursor: u64) -> EntityId {
    let mut bytes = [0u8; 16];
    bytes[8..].copy_from_slice(&cursor.to_be_bytes());
    EntityId::from_bytes(bytes)
}

fn entity_state_id(collection: &str, entity_id: &str) -> EntityId {
    EntityId::from_uuid(Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{collection}\0{entity_id}").as_bytes(),
    ))
}

fn idempotency_id(source_device_id: &str, source_op_id: u64) -> EntityId {
    EntityId::from_uuid(Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{source_device_id}\0{source_op_id}").as_bytes(),
    ))
}

fn encode_state(state: &ServerEntityState) -> Vec<u8> {
    let mut out = state.entity_version.to_le_bytes().to_vec();
    out.extend_from_slice(&state.last_modified.to_le_bytes());
    match &state.entity_cbor {
        Some(cbor) => {
            out.push(1);
            out.extend_from_slice(cbor);
        }
        None => out.push(0),
    }
    out
}

fn decode_state(bytes: &[u8]) -> Option<ServerEntityState> {
    if bytes.len() < 17 {
        return None;
    }
    let entity_version = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
    let last_modified = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
    let entity_cbor = match bytes[16] {
        1 => Some(bytes[17..].to_vec()),
        _ => None,
    };
    Some(ServerEntityState { entity_version, entity_cbor, last_modified })
}

/// Authoritative store of server operations and entity versions.
pub struct ServerOplog {
    database: Arc<Database>,
    next_cursor: AtomicU64,
    /// Serializes the whole push-acceptance sequence (§"a single exclusive
    /// lock serializes entry into the Server Oplog & Store").
    push_lock: Mutex<()>,
}

impl ServerOplog {
    /// Opens (or recovers) an oplog backed by `database`.
    pub fn new(database: Arc<Database>) -> ServerResult<Self> {
        let ops_collection =
            database.create_collection(SERVER_OPS_COLLECTION).map_err(ServerError::Database)?;
        let existing = database.list(ops_collection).map_err(ServerError::Database)?;
        let highest = existing
            .iter()
            .filter_map(|(_, bytes)| ServerOperation::decode(bytes).ok())
            .map(|op| op.server_cursor)
            .max()
            .unwrap_or(0);

        Ok(Self { database, next_cursor: AtomicU64::new(highest + 1), push_lock: Mutex::new(()) })
    }

    fn ops_collection(&self) -> ServerResult<CollectionId> {
        self.database.create_collection(SERVER_OPS_COLLECTION).map_err(ServerError::Database)
    }

    fn state_collection(&self) -> ServerResult<CollectionId> {
        self.database.create_collection(ENTITY_STATE_COLLECTION).map_err(ServerError::Database)
    }

    fn idempotency_collection(&self) -> ServerResult<CollectionId> {
        self.database.create_collection(IDEMPOTENCY_COLLECTION).map_err(ServerError::Database)
    }

    /// The highest assigned `server_cursor`, i.e. `global_op_id`.
    pub fn cursor(&self) -> u64 {
        self.next_cursor.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Number of operations recorded.
    pub fn len(&self) -> usize {
        self.ops_collection()
            .and_then(|c| self.database.list(c).map_err(ServerError::Database))
            .map(|ops| ops.len())
            .unwrap_or(0)
    }

    /// True if no operations have been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn all_ops_sorted(&self) -> ServerResult<Vec<ServerOperation>> {
        let collection = self.ops_collection()?;
        let mut ops: Vec<ServerOperation> = self
            .database
            .list(collection)
            .map_err(ServerError::Database)?
            .into_iter()
            .filter_map(|(_, bytes)| ServerOperation::decode(&bytes).ok())
            .collect();
        ops.sort_by_key(|op| op.server_cursor);
        Ok(ops)
    }

    /// Returns the ordered prefix of ops with `server_cursor > since_cursor`,
    /// optionally filtered to `collections`, capped at `limit`.
    pub fn operations_since(
        &self,
        since_cursor: u64,
        limit: u32,
        collections: Option<&[String]>,
    ) -> ServerResult<Vec<ServerOperation>> {
        let filtered: Vec<ServerOperation> = self
            .all_ops_sorted()?
            .into_iter()
            .filter(|op| op.server_cursor > since_cursor)
            .filter(|op| match collections {
                Some(wanted) => wanted.iter().any(|c| c == &op.op.collection),
                None => true,
            })
            .take(limit as usize)
            .collect();
        Ok(filtered)
    }

    /// True iff an op with cursor greater than `next_cursor` exists after
    /// applying the same collection filter.
    pub fn has_more_after(
        &self,
        next_cursor: u64,
        collections: Option<&[String]>,
    ) -> ServerResult<bool> {
        let has_more = self
            .all_ops_sorted()?
            .into_iter()
            .filter(|op| op.server_cursor > next_cursor)
            .any(|op| match collections {
                Some(wanted) => wanted.iter().any(|c| c == &op.op.collection),
                None => true,
            });
        Ok(has_more)
    }

    fn idempotency_probe(&self, source_device_id: &str, source_op_id: u64) -> ServerResult<Option<u64>> {
        let collection = self.idempotency_collection()?;
        let id = idempotency_id(source_device_id, source_op_id);
        let existing = self.database.get(collection, id).map_err(ServerError::Database)?;
        Ok(existing.and_then(|bytes| bytes.as_slice().try_into().ok()).map(u64::from_le_bytes))
    }

    fn entity_state(&self, collection: &str, entity_id: &str) -> ServerResult<Option<ServerEntityState>> {
        let state_collection = self.state_collection()?;
        let id = entity_state_id(collection, entity_id);
        let bytes = self.database.get(state_collection, id).map_err(ServerError::Database)?;
        Ok(bytes.as_deref().and_then(decode_state))
    }

    /// Checks `op` against the latest recorded state for its entity, per
    /// §4.7: no prior state or a strictly greater version accepts; anything
    /// else is a conflict carrying the server's current state.
    fn check_conflict(&self, op: &Operation) -> ServerResult<Option<Conflict>> {
        let Some(state) = self.entity_state(&op.collection, &op.entity_id)? else {
            return Ok(None);
        };
        if op.entity_version > state.entity_version {
            return Ok(None);
        }
        Ok(Some(Conflict {
            collection: op.collection.clone(),
            entity_id: op.entity_id.clone(),
            client_op: op.clone(),
            server_state: state,
        }))
    }

    /// Accepts a batch of client operations per §4.6's push algorithm.
    ///
    /// Processes `ops` in order; each accepted op is persisted inside its
    /// own durable transaction alongside the cursor bump and idempotency
    /// entry, so a crash mid-batch leaves already-accepted ops intact and
    /// the remainder simply unprocessed (safe to retry, since the
    /// idempotency probe will skip what was already accepted).
    ///
    /// Returns the newly assigned server ops alongside the ack/conflicts
    /// pair the wire response carries, so a caller can notify the
    /// Broadcast Hub (§4.8) without a second pass over the oplog.
    pub fn push(
        &self,
        device_id: &str,
        ops: Vec<Operation>,
    ) -> ServerResult<(u64, Vec<Conflict>, Vec<ServerOperation>)> {
        let _guard = self.push_lock.lock();

        let mut acknowledged_up_to = 0u64;
        let mut conflicts = Vec::new();
        let mut accepted = Vec::new();

        for op in ops {
            if let Some(_prior_cursor) = self.idempotency_probe(device_id, op.op_id)? {
                acknowledged_up_to = acknowledged_up_to.max(op.op_id);
                continue;
            }

            if let Some(conflict) = self.check_conflict(&op)? {
                conflicts.push(conflict);
                continue;
            }

            let cursor = self.next_cursor.fetch_add(1, Ordering::SeqCst);
            let server_op = ServerOperation {
                server_cursor: cursor,
                source_device_id: device_id.to_string(),
                source_op_id: op.op_id,
                op: op.clone(),
            };
            self.persist_accepted(&server_op)?;
            acknowledged_up_to = acknowledged_up_to.max(op.op_id);
            accepted.push(server_op);
        }

        Ok((acknowledged_up_to, conflicts, accepted))
    }

    fn persist_accepted(&self, server_op: &ServerOperation) -> ServerResult<()> {
        let ops_collection = self.ops_collection()?;
        let state_collection = self.state_collection()?;
        let idem_collection = self.idempotency_collection()?;

        let op_key = cursor_entity_id(server_op.server_cursor);
        let op_bytes = server_op.encode().map_err(|e| ServerError::Internal(e.to_string()))?;

        let state_key = entity_state_id(&server_op.op.collection, &server_op.op.entity_id);
        let new_state = ServerEntityState {
            entity_version: server_op.op.entity_version,
            entity_cbor: match server_op.op.op_type {
                OperationType::Upsert => server_op.op.entity_cbor.clone(),
                OperationType::Delete => None,
            },
            last_modified: server_op.op.timestamp_ms,
        };
        let state_bytes = encode_state(&new_state);

        let idem_key = idempotency_id(&server_op.source_device_id, server_op.source_op_id);
        let idem_bytes = server_op.server_cursor.to_le_bytes().to_vec();

        self.database
            .transaction(|txn| {
                txn.put(ops_collection, op_key, op_bytes.clone())?;
                txn.put(state_collection, state_key, state_bytes.clone())?;
                txn.put(idem_collection, idem_key, idem_bytes.clone())?;
                Ok(())
            })
            .map_err(ServerError::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oplog() -> ServerOplog {
        let db = Arc::new(Database::open_in_memory().unwrap());
        ServerOplog::new(db).unwrap()
    }

    fn op(device: &str, op_id: u64, entity: &str, version: u64) -> Operation {
        Operation::upsert(op_id, "db1", device, "notes", entity, version, vec![version as u8], 1_000 + op_id as i64)
    }

    #[test]
    fn accepts_first_write_to_new_entity() {
        let log = oplog();
        let (acked, conflicts, accepted) = log.push("dev1", vec![op("dev1", 1, "n1", 1)]).unwrap();
        assert_eq!(acked, 1);
        assert!(conflicts.is_empty());
        assert_eq!(accepted.len(), 1);
        assert_eq!(log.cursor(), 1);
    }

    #[test]
    fn rejects_non_increasing_version_as_conflict() {
        let log = oplog();
        log.push("dev1", vec![op("dev1", 1, "n1", 5)]).unwrap();

        let (acked, conflicts, accepted) = log.push("dev2", vec![op("dev2", 1, "n1", 5)]).unwrap();
        assert_eq!(acked, 0);
        assert_eq!(conflicts.len(), 1);
        assert!(accepted.is_empty());
        assert_eq!(conflicts[0].server_state.entity_version, 5);
    }

    #[test]
    fn accepts_strictly_greater_version() {
        let log = oplog();
        log.push("dev1", vec![op("dev1", 1, "n1", 5)]).unwrap();

        let (acked, conflicts, _accepted) = log.push("dev2", vec![op("dev2", 1, "n1", 6)]).unwrap();
        assert_eq!(acked, 1);
        assert!(conflicts.is_empty());
        assert_eq!(log.cursor(), 2);
    }

    #[test]
    fn idempotency_probe_skips_reprocessing() {
        let log = oplog();
        log.push("dev1", vec![op("dev1", 1, "n1", 1)]).unwrap();
        let (acked, conflicts, accepted) = log.push("dev1", vec![op("dev1", 1, "n1", 1)]).unwrap();
        assert_eq!(acked, 1);
        assert!(conflicts.is_empty());
        assert!(accepted.is_empty());
        // cursor did not advance a second time
        assert_eq!(log.cursor(), 1);
    }

    #[test]
    fn operations_since_filters_and_caps() {
        let log = oplog();
        log.push("dev1", vec![op("dev1", 1, "n1", 1), op("dev1", 2, "n2", 1)]).unwrap();

        let all = log.operations_since(0, 10, None).unwrap();
        assert_eq!(all.len(), 2);

        let capped = log.operations_since(0, 1, None).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].server_cursor, 1);

        assert!(log.has_more_after(1, None).unwrap());
        assert!(!log.has_more_after(2, None).unwrap());
    }

    #[test]
    fn recovers_cursor_on_reopen() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        {
            let log = ServerOplog::new(db.clone()).unwrap();
            log.push("dev1", vec![op("dev1", 1, "n1", 1), op("dev1", 2, "n2", 1)]).unwrap();
            assert_eq!(log.cursor(), 2);
        }
        let reopened = ServerOplog::new(db).unwrap();
        assert_eq!(reopened.cursor(), 2);
    }

    #[test]
    fn delete_clears_entity_cbor_in_state() {
        let log = oplog();
        log.push("dev1", vec![op("dev1", 1, "n1", 1)]).unwrap();
        let delete = Operation::delete(2, "db1", "dev1", "notes", "n1", 2, 2_000);
        log.push("dev1", vec![delete]).unwrap();

        let state = log.entity_state("notes", "n1").unwrap().unwrap();
        assert_eq!(state.entity_version, 2);
        assert_eq!(state.entity_cbor, None);
    }
}
