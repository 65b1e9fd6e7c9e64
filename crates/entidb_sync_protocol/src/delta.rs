//! Optional field-level delta codec for entity payloads (C10).
//!
//! Operates purely on decoded [`Value`] trees: the caller decodes an
//! entity's CBOR payload, computes or applies a [`Patch`], and
//! re-encodes. Intended to shrink the wire size of small edits to large
//! entities; never required for correctness, since every operation also
//! carries (or can fall back to) the full `entity_cbor` blob.

use entidb_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};

/// A single field-level edit.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Sets a field to a value it did not previously have (or had as null).
    Set {
        /// The top-level field name.
        field: String,
        /// The new value.
        value: Value,
    },
    /// Removes a field entirely.
    Remove {
        /// The top-level field name.
        field: String,
    },
    /// Adds `delta` to an integer field's current value.
    Increment {
        /// The top-level field name.
        field: String,
        /// The signed amount to add.
        delta: i64,
    },
    /// Appends items to the end of an array field.
    ArrayAppend {
        /// The top-level field name.
        field: String,
        /// Items to append, in order.
        items: Vec<Value>,
    },
    /// Removes `count` items from the end of an array field.
    ArrayRemove {
        /// The top-level field name.
        field: String,
        /// Number of trailing items to remove.
        count: usize,
    },
    /// Replaces a field's value wholesale (used when a finer-grained op
    /// does not apply, e.g. a changed nested map).
    Replace {
        /// The top-level field name.
        field: String,
        /// The new value.
        value: Value,
    },
}

/// A set of field-level edits relative to a known base version.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// The `entity_version` this patch applies on top of.
    pub base_version: u64,
    /// Edits to apply, in order.
    pub ops: Vec<PatchOp>,
}

impl Patch {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let ops = self.ops.iter().map(encode_op).collect();
        to_canonical_cbor(&Value::map(vec![
            (
                Value::Text("base_version".into()),
                Value::Integer(self.base_version as i64),
            ),
            (Value::Text("ops".into()), Value::Array(ops)),
        ]))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let base_version = value
            .get("base_version")
            .and_then(Value::as_integer)
            .ok_or_else(|| CodecError::invalid_structure("missing field `base_version`"))?
            as u64;
        let ops = value
            .get("ops")
            .and_then(Value::as_array)
            .ok_or_else(|| CodecError::invalid_structure("missing field `ops`"))?
            .iter()
            .map(decode_op)
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { base_version, ops })
    }
}

fn encode_op(op: &PatchOp) -> Value {
    match op {
        PatchOp::Set { field, value } => Value::map(vec![
            (Value::Text("kind".into()), Value::Text("set".into())),
            (Value::Text("field".into()), Value::Text(field.clone())),
            (Value::Text("value".into()), value.clone()),
        ]),
        PatchOp::Remove { field } => Value::map(vec![
            (Value::Text("kind".into()), Value::Text("remove".into())),
            (Value::Text("field".into()), Value::Text(field.clone())),
        ]),
        PatchOp::Increment { field, delta } => Value::map(vec![
            (Value::Text("kind".into()), Value::Text("increment".into())),
            (Value::Text("field".into()), Value::Text(field.clone())),
            (Value::Text("delta".into()), Value::Integer(*delta)),
        ]),
        PatchOp::ArrayAppend { field, items } => Value::map(vec![
            (Value::Text("kind".into()), Value::Text("array_append".into())),
            (Value::Text("field".into()), Value::Text(field.clone())),
            (Value::Text("items".into()), Value::Array(items.clone())),
        ]),
        PatchOp::ArrayRemove { field, count } => Value::map(vec![
            (Value::Text("kind".into()), Value::Text("array_remove".into())),
            (Value::Text("field".into()), Value::Text(field.clone())),
            (Value::Text("count".into()), Value::Integer(*count as i64)),
        ]),
        PatchOp::Replace { field, value } => Value::map(vec![
            (Value::Text("kind".into()), Value::Text("replace".into())),
            (Value::Text("field".into()), Value::Text(field.clone())),
            (Value::Text("value".into()), value.clone()),
        ]),
    }
}

fn decode_op(value: &Value) -> CodecResult<PatchOp> {
    let kind = value
        .get("kind")
        .and_then(Value::as_text)
        .ok_or_else(|| CodecError::invalid_structure("patch op missing `kind`"))?;
    let field = value
        .get("field")
        .and_then(Value::as_text)
        .ok_or_else(|| CodecError::invalid_structure("patch op missing `field`"))?
        .to_string();
    match kind {
        "set" => Ok(PatchOp::Set {
            field,
            value: value
                .get("value")
                .cloned()
                .ok_or_else(|| CodecError::invalid_structure("set op missing `value`"))?,
        }),
        "remove" => Ok(PatchOp::Remove { field }),
        "increment" => Ok(PatchOp::Increment {
            field,
            delta: value
                .get("delta")
                .and_then(Value::as_integer)
                .ok_or_else(|| CodecError::invalid_structure("increment op missing `delta`"))?,
        }),
        "array_append" => Ok(PatchOp::ArrayAppend {
            field,
            items: value
                .get("items")
                .and_then(Value::as_array)
                .ok_or_else(|| CodecError::invalid_structure("array_append op missing `items`"))?
                .to_vec(),
        }),
        "array_remove" => Ok(PatchOp::ArrayRemove {
            field,
            count: value
                .get("count")
                .and_then(Value::as_integer)
                .ok_or_else(|| CodecError::invalid_structure("array_remove op missing `count`"))?
                as usize,
        }),
        "replace" => Ok(PatchOp::Replace {
            field,
            value: value
                .get("value")
                .cloned()
                .ok_or_else(|| CodecError::invalid_structure("replace op missing `value`"))?,
        }),
        other => Err(CodecError::invalid_structure(format!("unknown patch op kind `{other}`"))),
    }
}

/// Computes and applies field-level patches between two entity payloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaCodec {
    /// If the fraction of changed top-level fields exceeds this ratio,
    /// [`diff`](Self::diff) returns `None` rather than a patch, signaling
    /// the caller to send the full blob instead.
    pub replace_threshold: f64,
}

impl Default for DeltaCodec {
    fn default() -> Self {
        Self { replace_threshold: 0.7 }
    }
}

impl DeltaCodec {
    /// Builds a codec with a custom replace threshold.
    pub fn with_replace_threshold(replace_threshold: f64) -> Self {
        Self { replace_threshold }
    }

    /// Computes a patch that turns `old_blob` into `new_blob`.
    ///
    /// Returns `None` when the two payloads are not both top-level maps,
    /// or when the fraction of changed fields exceeds
    /// [`Self::replace_threshold`] — in both cases the caller should ship
    /// `new_blob` whole rather than a patch.
    pub fn diff(&self, old_blob: &[u8], new_blob: &[u8], base_version: u64) -> CodecResult<Option<Patch>> {
        let old = from_cbor(old_blob)?;
        let new = from_cbor(new_blob)?;
        let (Some(old_fields), Some(new_fields)) = (old.as_map(), new.as_map()) else {
            return Ok(None);
        };

        let mut field_names: Vec<&str> = old_fields
            .iter()
            .chain(new_fields.iter())
            .filter_map(|(k, _)| k.as_text())
            .collect();
        field_names.sort_unstable();
        field_names.dedup();

        let mut ops = Vec::new();
        let mut changed = 0usize;
        for field in &field_names {
            let old_value = old.get(field);
            let new_value = new.get(field);
            match (old_value, new_value) {
                (Some(ov), Some(nv)) if ov == nv => continue,
                (None, Some(nv)) => {
                    ops.push(PatchOp::Set { field: (*field).into(), value: nv.clone() });
                    changed += 1;
                }
                (Some(_), None) => {
                    ops.push(PatchOp::Remove { field: (*field).into() });
                    changed += 1;
                }
                (Some(Value::Integer(ov)), Some(Value::Integer(nv))) => {
                    ops.push(PatchOp::Increment { field: (*field).into(), delta: nv - ov });
                    changed += 1;
                }
                (Some(Value::Array(ov)), Some(Value::Array(nv))) if nv.len() >= ov.len() && nv[..ov.len()] == ov[..] => {
                    ops.push(PatchOp::ArrayAppend {
                        field: (*field).into(),
                        items: nv[ov.len()..].to_vec(),
                    });
                    changed += 1;
                }
                (Some(Value::Array(ov)), Some(Value::Array(nv))) if ov.len() > nv.len() && ov[..nv.len()] == nv[..] => {
                    ops.push(PatchOp::ArrayRemove {
                        field: (*field).into(),
                        count: ov.len() - nv.len(),
                    });
                    changed += 1;
                }
                (Some(_), Some(nv)) => {
                    ops.push(PatchOp::Replace { field: (*field).into(), value: nv.clone() });
                    changed += 1;
                }
                (None, None) => unreachable!("field drawn from union of present keys"),
            }
        }

        if field_names.is_empty() {
            return Ok(Some(Patch { base_version, ops }));
        }
        let change_ratio = changed as f64 / field_names.len() as f64;
        if change_ratio > self.replace_threshold {
            return Ok(None);
        }
        Ok(Some(Patch { base_version, ops }))
    }

    /// Applies a patch to a base payload, producing the patched payload.
    pub fn apply(&self, base_blob: &[u8], patch: &Patch) -> CodecResult<Vec<u8>> {
        let base = from_cbor(base_blob)?;
        let mut fields = base
            .as_map()
            .ok_or_else(|| CodecError::invalid_structure("patch base must be a map"))?
            .to_vec();

        for op in &patch.ops {
            match op {
                PatchOp::Set { field, value } | PatchOp::Replace { field, value } => {
                    let key = Value::Text(field.clone());
                    fields.retain(|(k, _)| k != &key);
                    fields.push((key, value.clone()));
                }
                PatchOp::Remove { field } => {
                    let key = Value::Text(field.clone());
                    fields.retain(|(k, _)| k != &key);
                }
                PatchOp::Increment { field, delta } => {
                    let key = Value::Text(field.clone());
                    let current = fields
                        .iter()
                        .find(|(k, _)| k == &key)
                        .and_then(|(_, v)| v.as_integer())
                        .ok_or_else(|| {
                            CodecError::invalid_structure(format!("increment target `{field}` is not an integer"))
                        })?;
                    fields.retain(|(k, _)| k != &key);
                    fields.push((key, Value::Integer(current + delta)));
                }
                PatchOp::ArrayAppend { field, items } => {
                    let key = Value::Text(field.clone());
                    let mut current = fields
                        .iter()
                        .find(|(k, _)| k == &key)
                        .and_then(|(_, v)| v.as_array())
                        .ok_or_else(|| {
                            CodecError::invalid_structure(format!("array_append target `{field}` is not an array"))
                        })?
                        .to_vec();
                    current.extend(items.iter().cloned());
                    fields.retain(|(k, _)| k != &key);
                    fields.push((key, Value::Array(current)));
                }
                PatchOp::ArrayRemove { field, count } => {
                    let key = Value::Text(field.clone());
                    let mut current = fields
                        .iter()
                        .find(|(k, _)| k == &key)
                        .and_then(|(_, v)| v.as_array())
                        .ok_or_else(|| {
                            CodecError::invalid_structure(format!("array_remove target `{field}` is not an array"))
                        })?
                        .to_vec();
                    let new_len = current.len().saturating_sub(*count);
                    current.truncate(new_len);
                    fields.retain(|(k, _)| k != &key);
                    fields.push((key, Value::Array(current)));
                }
            }
        }

        to_canonical_cbor(&Value::map(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_map(pairs: Vec<(&str, Value)>) -> Vec<u8> {
        let value = Value::map(pairs.into_iter().map(|(k, v)| (Value::Text(k.into()), v)).collect());
        to_canonical_cbor(&value).unwrap()
    }

    #[test]
    fn diff_and_apply_round_trip_for_small_edit() {
        let old = encode_map(vec![
            ("name", Value::Text("alice".into())),
            ("score", Value::Integer(10)),
            ("tags", Value::Array(vec![Value::Text("a".into())])),
        ]);
        let new = encode_map(vec![
            ("name", Value::Text("alice".into())),
            ("score", Value::Integer(15)),
            ("tags", Value::Array(vec![Value::Text("a".into()), Value::Text("b".into())])),
        ]);

        let codec = DeltaCodec::default();
        let patch = codec.diff(&old, &new, 1).unwrap().expect("small edit should patch");
        assert_eq!(patch.ops.len(), 2);

        let applied = codec.apply(&old, &patch).unwrap();
        let applied_value = from_cbor(&applied).unwrap();
        let expected_value = from_cbor(&new).unwrap();
        assert_eq!(applied_value, expected_value);
    }

    #[test]
    fn diff_falls_back_to_replace_above_threshold() {
        let old = encode_map(vec![("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        let new = encode_map(vec![("a", Value::Integer(9)), ("b", Value::Integer(9))]);

        let codec = DeltaCodec::with_replace_threshold(0.4);
        assert!(codec.diff(&old, &new, 1).unwrap().is_none());
    }

    #[test]
    fn patch_round_trip_encoding() {
        let patch = Patch {
            base_version: 7,
            ops: vec![
                PatchOp::Increment { field: "score".into(), delta: -3 },
                PatchOp::Remove { field: "stale".into() },
            ],
        };
        let decoded = Patch::decode(&patch.encode().unwrap()).unwrap();
        assert_eq!(patch, decoded);
    }

    #[test]
    fn remove_then_set_round_trips() {
        let old = encode_map(vec![("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        let new = encode_map(vec![("a", Value::Integer(1)), ("c", Value::Integer(3))]);

        let codec = DeltaCodec::default();
        let patch = codec.diff(&old, &new, 1).unwrap().unwrap();
        let applied = codec.apply(&old, &patch).unwrap();
        assert_eq!(from_cbor(&applied).unwrap(), from_cbor(&new).unwrap());
    }
}
