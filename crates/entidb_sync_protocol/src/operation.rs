//! Logical operation record and its canonical binary encoding (C1).

use entidb_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};

/// Whether an operation upserts or removes an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Entity was created or replaced; carries `entity_cbor`.
    Upsert,
    /// Entity was removed; carries no payload.
    Delete,
}

impl OperationType {
    fn as_str(self) -> &'static str {
        match self {
            OperationType::Upsert => "upsert",
            OperationType::Delete => "delete",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "upsert" => Some(OperationType::Upsert),
            "delete" => Some(OperationType::Delete),
            _ => None,
        }
    }
}

/// A logical, immutable operation record.
///
/// Fields mirror the originator's view of a single committed mutation.
/// `entity_cbor` is opaque and passed through byte-for-byte; the sync core
/// never inspects it.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Monotonic per-device identifier. First op is 1, never reused.
    pub op_id: u64,
    /// Logical database namespace.
    pub db_id: String,
    /// Stable identifier of the originating device.
    pub device_id: String,
    /// Entity bucket. Names starting with `_` are internal and must never
    /// reach this type from the oplog boundary.
    pub collection: String,
    /// Entity key within its collection.
    pub entity_id: String,
    /// Upsert or delete.
    pub op_type: OperationType,
    /// Originator-assigned monotonic version tag for this entity.
    pub entity_version: u64,
    /// Opaque payload, present iff `op_type == Upsert`.
    pub entity_cbor: Option<Vec<u8>>,
    /// Milliseconds since UNIX epoch. Informational only; never consulted
    /// for ordering or conflict decisions.
    pub timestamp_ms: i64,
}

impl Operation {
    /// Builds an Upsert operation.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert(
        op_id: u64,
        db_id: impl Into<String>,
        device_id: impl Into<String>,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        entity_version: u64,
        entity_cbor: Vec<u8>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            op_id,
            db_id: db_id.into(),
            device_id: device_id.into(),
            collection: collection.into(),
            entity_id: entity_id.into(),
            op_type: OperationType::Upsert,
            entity_version,
            entity_cbor: Some(entity_cbor),
            timestamp_ms,
        }
    }

    /// Builds a Delete operation.
    pub fn delete(
        op_id: u64,
        db_id: impl Into<String>,
        device_id: impl Into<String>,
        collection: impl Into<String>,
        entity_id: impl Into<String>,
        entity_version: u64,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            op_id,
            db_id: db_id.into(),
            device_id: device_id.into(),
            collection: collection.into(),
            entity_id: entity_id.into(),
            op_type: OperationType::Delete,
            entity_version,
            entity_cbor: None,
            timestamp_ms,
        }
    }

    /// Whether this operation targets an internal (hidden) collection.
    pub fn is_internal(&self) -> bool {
        self.collection.starts_with('_')
    }

    /// Encodes this operation to its canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&self.to_value())
    }

    /// Decodes an operation from its canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        Self::from_value(&value)
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = vec![
            (Value::Text("op_id".into()), Value::Integer(self.op_id as i64)),
            (Value::Text("db_id".into()), Value::Text(self.db_id.clone())),
            (Value::Text("device_id".into()), Value::Text(self.device_id.clone())),
            (Value::Text("collection".into()), Value::Text(self.collection.clone())),
            (Value::Text("entity_id".into()), Value::Text(self.entity_id.clone())),
            (Value::Text("op_type".into()), Value::Text(self.op_type.as_str().into())),
            (
                Value::Text("entity_version".into()),
                Value::Integer(self.entity_version as i64),
            ),
            (Value::Text("timestamp_ms".into()), Value::Integer(self.timestamp_ms)),
        ];
        if let Some(cbor) = &self.entity_cbor {
            fields.push((Value::Text("entity_cbor".into()), Value::Bytes(cbor.clone())));
        }
        Value::map(fields)
    }

    pub(crate) fn from_value(value: &Value) -> CodecResult<Self> {
        let get = |field: &str| -> CodecResult<&Value> {
            value
                .get(field)
                .ok_or_else(|| CodecError::invalid_structure(format!("missing field `{field}`")))
        };

        let op_id = get("op_id")?
            .as_integer()
            .ok_or_else(|| CodecError::invalid_structure("op_id must be an integer"))?
            as u64;
        let db_id = get("db_id")?
            .as_text()
            .ok_or_else(|| CodecError::invalid_structure("db_id must be text"))?
            .to_string();
        let device_id = get("device_id")?
            .as_text()
            .ok_or_else(|| CodecError::invalid_structure("device_id must be text"))?
            .to_string();
        let collection = get("collection")?
            .as_text()
            .ok_or_else(|| CodecError::invalid_structure("collection must be text"))?
            .to_string();
        let entity_id = get("entity_id")?
            .as_text()
            .ok_or_else(|| CodecError::invalid_structure("entity_id must be text"))?
            .to_string();
        let op_type_str = get("op_type")?
            .as_text()
            .ok_or_else(|| CodecError::invalid_structure("op_type must be text"))?;
        let op_type = OperationType::from_str(op_type_str)
            .ok_or_else(|| CodecError::invalid_structure(format!("unknown op_type `{op_type_str}`")))?;
        let entity_version = get("entity_version")?
            .as_integer()
            .ok_or_else(|| CodecError::invalid_structure("entity_version must be an integer"))?
            as u64;
        let timestamp_ms = get("timestamp_ms")?
            .as_integer()
            .ok_or_else(|| CodecError::invalid_structure("timestamp_ms must be an integer"))?;
        let entity_cbor = match value.get("entity_cbor") {
            Some(v) => Some(
                v.as_bytes()
                    .ok_or_else(|| CodecError::invalid_structure("entity_cbor must be bytes"))?
                    .to_vec(),
            ),
            None => None,
        };

        if matches!(op_type, OperationType::Upsert) && entity_cbor.is_none() {
            return Err(CodecError::invalid_structure(
                "upsert operation missing entity_cbor",
            ));
        }
        if matches!(op_type, OperationType::Delete) && entity_cbor.is_some() {
            return Err(CodecError::invalid_structure(
                "delete operation must not carry entity_cbor",
            ));
        }

        Ok(Self {
            op_id,
            db_id,
            device_id,
            collection,
            entity_id,
            op_type,
            entity_version,
            entity_cbor,
            timestamp_ms,
        })
    }
}

/// A server-stored operation: an `Operation` plus server-assigned identity.
///
/// The triple `(db_id, source_device_id, source_op_id)` is the idempotency
/// key enforced by the server oplog on push.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOperation {
    /// Globally monotonic cursor assigned by the server at acceptance.
    pub server_cursor: u64,
    /// The originating client's device id.
    pub source_device_id: String,
    /// The originating client's op id.
    pub source_op_id: u64,
    /// The accepted operation, as originated.
    pub op: Operation,
}

impl ServerOperation {
    /// Encodes this server operation to its canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut fields = match self.op.to_value() {
            Value::Map(pairs) => pairs,
            _ => unreachable!("Operation::to_value always returns a Map"),
        };
        fields.push((
            Value::Text("server_cursor".into()),
            Value::Integer(self.server_cursor as i64),
        ));
        fields.push((
            Value::Text("source_device_id".into()),
            Value::Text(self.source_device_id.clone()),
        ));
        fields.push((
            Value::Text("source_op_id".into()),
            Value::Integer(self.source_op_id as i64),
        ));
        to_canonical_cbor(&Value::map(fields))
    }

    /// Decodes a server operation from its canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let op = Operation::from_value(&value)?;
        let server_cursor = value
            .get("server_cursor")
            .and_then(Value::as_integer)
            .ok_or_else(|| CodecError::invalid_structure("missing field `server_cursor`"))?
            as u64;
        let source_device_id = value
            .get("source_device_id")
            .and_then(Value::as_text)
            .ok_or_else(|| CodecError::invalid_structure("missing field `source_device_id`"))?
            .to_string();
        let source_op_id = value
            .get("source_op_id")
            .and_then(Value::as_integer)
            .ok_or_else(|| CodecError::invalid_structure("missing field `source_op_id`"))?
            as u64;
        Ok(Self {
            server_cursor,
            source_device_id,
            source_op_id,
            op,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_round_trip() {
        let op = Operation::upsert(1, "db1", "dev1", "users", "u1", 1, vec![1, 2, 3], 1_000);
        let bytes = op.encode().unwrap();
        let decoded = Operation::decode(&bytes).unwrap();
        assert_eq!(op, decoded);
    }

    #[test]
    fn delete_round_trip() {
        let op = Operation::delete(2, "db1", "dev1", "users", "u1", 2, 2_000);
        let bytes = op.encode().unwrap();
        let decoded = Operation::decode(&bytes).unwrap();
        assert_eq!(op, decoded);
        assert!(decoded.entity_cbor.is_none());
    }

    #[test]
    fn internal_collection_detection() {
        let op = Operation::delete(1, "db1", "dev1", "_meta", "x", 1, 1);
        assert!(op.is_internal());
        let op = Operation::delete(1, "db1", "dev1", "users", "x", 1, 1);
        assert!(!op.is_internal());
    }

    #[test]
    fn decode_missing_field_fails() {
        let value = Value::map(vec![(Value::Text("op_id".into()), Value::Integer(1))]);
        let bytes = to_canonical_cbor(&value).unwrap();
        assert!(Operation::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_upsert_without_payload() {
        let op = Operation::delete(1, "db1", "dev1", "users", "u1", 1, 1);
        let mut value = op.to_value();
        if let Value::Map(fields) = &mut value {
            fields.retain(|(k, _)| k.as_text() != Some("op_type"));
            fields.push((Value::Text("op_type".into()), Value::Text("upsert".into())));
        }
        let bytes = to_canonical_cbor(&value).unwrap();
        assert!(Operation::decode(&bytes).is_err());
    }

    #[test]
    fn server_operation_round_trip() {
        let op = Operation::upsert(5, "db1", "dev1", "users", "u1", 3, vec![7, 7], 10);
        let server_op = ServerOperation {
            server_cursor: 42,
            source_device_id: "dev1".into(),
            source_op_id: 5,
            op,
        };
        let bytes = server_op.encode().unwrap();
        let decoded = ServerOperation::decode(&bytes).unwrap();
        assert_eq!(server_op, decoded);
    }
}
