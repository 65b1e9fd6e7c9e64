//! Version-based conflict representation and pluggable resolution (C7).
//!
//! The source modeled resolution as a class hierarchy
//! (`ServerWins`/`ClientWins`/`LastWriteWins`/`Custom`/`Composite` subtypes).
//! Here a conflict resolver is a single function value
//! (`Conflict -> Option<Operation>`); a `Some` result is a replacement
//! operation to re-push, `None` means accept the server's version as-is.

use crate::operation::Operation;
use entidb_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};

/// The server's last-known state for the entity a push op collided with.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEntityState {
    /// The server's current version for this entity.
    pub entity_version: u64,
    /// The server's current payload for this entity (`None` if deleted).
    pub entity_cbor: Option<Vec<u8>>,
    /// Milliseconds since UNIX epoch of the server op that set this state.
    pub last_modified: i64,
}

/// A version conflict surfaced by the server on push.
///
/// Produced when a pushed op's `entity_version` does not exceed the
/// server's latest version for `(collection, entity_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// The entity's collection.
    pub collection: String,
    /// The entity's key within its collection.
    pub entity_id: String,
    /// The client operation that was rejected.
    pub client_op: Operation,
    /// The server's current state for this entity.
    pub server_state: ServerEntityState,
}

impl Conflict {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut fields = vec![
            (Value::Text("collection".into()), Value::Text(self.collection.clone())),
            (Value::Text("entity_id".into()), Value::Text(self.entity_id.clone())),
            (Value::Text("client_op".into()), self.client_op.to_value()),
            (
                Value::Text("server_entity_version".into()),
                Value::Integer(self.server_state.entity_version as i64),
            ),
            (
                Value::Text("server_last_modified".into()),
                Value::Integer(self.server_state.last_modified),
            ),
        ];
        if let Some(cbor) = &self.server_state.entity_cbor {
            fields.push((
                Value::Text("server_entity_cbor".into()),
                Value::Bytes(cbor.clone()),
            ));
        }
        to_canonical_cbor(&Value::map(fields))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let collection = value
            .get("collection")
            .and_then(Value::as_text)
            .ok_or_else(|| CodecError::invalid_structure("missing field `collection`"))?
            .to_string();
        let entity_id = value
            .get("entity_id")
            .and_then(Value::as_text)
            .ok_or_else(|| CodecError::invalid_structure("missing field `entity_id`"))?
            .to_string();
        let client_op_value = value
            .get("client_op")
            .ok_or_else(|| CodecError::invalid_structure("missing field `client_op`"))?;
        let client_op = Operation::from_value(client_op_value)?;
        let entity_version = value
            .get("server_entity_version")
            .and_then(Value::as_integer)
            .ok_or_else(|| CodecError::invalid_structure("missing field `server_entity_version`"))?
            as u64;
        let last_modified = value
            .get("server_last_modified")
            .and_then(Value::as_integer)
            .ok_or_else(|| CodecError::invalid_structure("missing field `server_last_modified`"))?;
        let entity_cbor = match value.get("server_entity_cbor") {
            Some(v) => Some(
                v.as_bytes()
                    .ok_or_else(|| CodecError::invalid_structure("server_entity_cbor must be bytes"))?
                    .to_vec(),
            ),
            None => None,
        };

        Ok(Self {
            collection,
            entity_id,
            client_op,
            server_state: ServerEntityState {
                entity_version,
                entity_cbor,
                last_modified,
            },
        })
    }
}

/// A conflict resolver: given a conflict, either produce a replacement
/// operation to re-push (`Some`) or accept the server's version (`None`).
pub type ConflictResolver = Box<dyn Fn(&Conflict) -> Option<Operation> + Send + Sync>;

/// Always accepts the server's version (no retry).
pub fn server_wins() -> ConflictResolver {
    Box::new(|_conflict| None)
}

/// Always retries the client's op with a version beyond the server's.
pub fn client_wins() -> ConflictResolver {
    Box::new(|conflict| Some(bump_version(conflict)))
}

/// Prefers whichever op's (informational) timestamp is newer; ties favor
/// the server. `timestamp_ms` is otherwise never consulted by the core, but
/// this named policy is an explicit, opt-in exception for callers who want
/// it.
pub fn last_write_wins() -> ConflictResolver {
    Box::new(|conflict| {
        if conflict.client_op.timestamp_ms > conflict.server_state.last_modified {
            Some(bump_version(conflict))
        } else {
            None
        }
    })
}

/// Wraps an arbitrary resolution function.
pub fn custom<F>(f: F) -> ConflictResolver
where
    F: Fn(&Conflict) -> Option<Operation> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Tries each resolver in order, using the first one that returns `Some`,
/// else accepts the server's version.
pub fn composite(resolvers: Vec<ConflictResolver>) -> ConflictResolver {
    Box::new(move |conflict| resolvers.iter().find_map(|resolve| resolve(conflict)))
}

/// Builds a replacement op identical to the client's original but with a
/// version strictly beyond the server's current version, so the retry can
/// pass the strict `v > v_srv` check.
fn bump_version(conflict: &Conflict) -> Operation {
    let mut retry = conflict.client_op.clone();
    retry.entity_version = conflict.server_state.entity_version + 1;
    retry
}
