//! Wire envelopes exchanged between client and server (C5 payloads).

use crate::conflict::Conflict;
use crate::operation::{Operation, ServerOperation};
use entidb_codec::{from_cbor, to_canonical_cbor, CodecError, CodecResult, Value};

fn get_text(value: &Value, field: &str) -> CodecResult<String> {
    value
        .get(field)
        .and_then(Value::as_text)
        .map(str::to_string)
        .ok_or_else(|| CodecError::invalid_structure(format!("missing field `{field}`")))
}

fn get_u64(value: &Value, field: &str) -> CodecResult<u64> {
    value
        .get(field)
        .and_then(Value::as_integer)
        .map(|n| n as u64)
        .ok_or_else(|| CodecError::invalid_structure(format!("missing field `{field}`")))
}

/// Wire protocol version this crate speaks. Bumped whenever a handshake,
/// pull, or push envelope changes shape in a way older peers can't parse.
pub const PROTOCOL_VERSION: u16 = 1;

/// Information the client reports about itself at handshake time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientInfo {
    /// Platform name, e.g. `"ios"`, `"linux"`.
    pub platform: String,
    /// Client application version string.
    pub app_version: String,
    /// Freeform metadata the server may log but never interprets.
    pub metadata: Option<Vec<(String, String)>>,
}

impl ClientInfo {
    fn to_value(&self) -> Value {
        let mut fields = vec![
            (Value::Text("platform".into()), Value::Text(self.platform.clone())),
            (Value::Text("app_version".into()), Value::Text(self.app_version.clone())),
        ];
        if let Some(metadata) = &self.metadata {
            let pairs = metadata
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), Value::Text(v.clone())))
                .collect();
            fields.push((Value::Text("metadata".into()), Value::Map(pairs)));
        }
        Value::map(fields)
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let platform = get_text(value, "platform").unwrap_or_default();
        let app_version = get_text(value, "app_version").unwrap_or_default();
        let metadata = value.get("metadata").and_then(Value::as_map).map(|pairs| {
            pairs
                .iter()
                .filter_map(|(k, v)| Some((k.as_text()?.to_string(), v.as_text()?.to_string())))
                .collect()
        });
        Ok(Self {
            platform,
            app_version,
            metadata,
        })
    }
}

/// Opens a sync session for a `(db_id, device_id)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    /// Logical database namespace.
    pub db_id: String,
    /// Stable identifier of the requesting device.
    pub device_id: String,
    /// The wire protocol version this client speaks.
    pub protocol_version: u16,
    /// Client-reported environment info.
    pub client_info: ClientInfo,
}

impl HandshakeRequest {
    /// Builds a request at this crate's current [`PROTOCOL_VERSION`].
    pub fn new(db_id: impl Into<String>, device_id: impl Into<String>, client_info: ClientInfo) -> Self {
        Self {
            db_id: db_id.into(),
            device_id: device_id.into(),
            protocol_version: PROTOCOL_VERSION,
            client_info,
        }
    }

    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&Value::map(vec![
            (Value::Text("db_id".into()), Value::Text(self.db_id.clone())),
            (Value::Text("device_id".into()), Value::Text(self.device_id.clone())),
            (
                Value::Text("protocol_version".into()),
                Value::Integer(i64::from(self.protocol_version)),
            ),
            (Value::Text("client_info".into()), self.client_info.to_value()),
        ]))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let client_info = match value.get("client_info") {
            Some(v) => ClientInfo::from_value(v)?,
            None => ClientInfo::default(),
        };
        let protocol_version = value
            .get("protocol_version")
            .and_then(Value::as_integer)
            .unwrap_or(1) as u16;
        Ok(Self {
            db_id: get_text(&value, "db_id")?,
            device_id: get_text(&value, "device_id")?,
            protocol_version,
            client_info,
        })
    }
}

/// The transports the server offers on this endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerCapabilities {
    /// Channel A pull is available.
    pub pull: bool,
    /// Channel A push is available.
    pub push: bool,
    /// Channel B (long-lived bidirectional push) is available.
    pub channel_b: bool,
}

impl ServerCapabilities {
    fn to_value(self) -> Value {
        Value::map(vec![
            (Value::Text("pull".into()), Value::Bool(self.pull)),
            (Value::Text("push".into()), Value::Bool(self.push)),
            (Value::Text("channel_b".into()), Value::Bool(self.channel_b)),
        ])
    }

    fn from_value(value: &Value) -> Self {
        Self {
            pull: value.get("pull").and_then(Value::as_bool).unwrap_or(false),
            push: value.get("push").and_then(Value::as_bool).unwrap_or(false),
            channel_b: value.get("channel_b").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

/// Server's reply to a handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    /// The wire protocol version the server speaks.
    pub protocol_version: u16,
    /// The server's current cursor for this database.
    pub server_cursor: u64,
    /// Transports this server offers.
    pub capabilities: ServerCapabilities,
    /// Opaque bearer token to use for subsequent requests, if auth is enabled.
    pub session_token: Option<String>,
}

impl HandshakeResponse {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut fields = vec![
            (
                Value::Text("protocol_version".into()),
                Value::Integer(i64::from(self.protocol_version)),
            ),
            (
                Value::Text("server_cursor".into()),
                Value::Integer(self.server_cursor as i64),
            ),
            (Value::Text("capabilities".into()), self.capabilities.to_value()),
        ];
        if let Some(token) = &self.session_token {
            fields.push((Value::Text("session_token".into()), Value::Text(token.clone())));
        }
        to_canonical_cbor(&Value::map(fields))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let capabilities = value
            .get("capabilities")
            .map(ServerCapabilities::from_value)
            .unwrap_or_default();
        let session_token = value
            .get("session_token")
            .and_then(Value::as_text)
            .map(str::to_string);
        let protocol_version = value
            .get("protocol_version")
            .and_then(Value::as_integer)
            .unwrap_or(1) as u16;
        Ok(Self {
            protocol_version,
            server_cursor: get_u64(&value, "server_cursor")?,
            capabilities,
            session_token,
        })
    }
}

/// Requests operations committed after `since_cursor`.
#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    /// Logical database namespace.
    pub db_id: String,
    /// Exclusive lower bound cursor.
    pub since_cursor: u64,
    /// Maximum operations to return in one response.
    pub limit: u32,
    /// When present, restricts results to these collections.
    pub collections: Option<Vec<String>>,
}

impl PullRequest {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut fields = vec![
            (Value::Text("db_id".into()), Value::Text(self.db_id.clone())),
            (
                Value::Text("since_cursor".into()),
                Value::Integer(self.since_cursor as i64),
            ),
            (Value::Text("limit".into()), Value::Integer(i64::from(self.limit))),
        ];
        if let Some(collections) = &self.collections {
            fields.push((
                Value::Text("collections".into()),
                Value::Array(collections.iter().cloned().map(Value::Text).collect()),
            ));
        }
        to_canonical_cbor(&Value::map(fields))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let limit = value
            .get("limit")
            .and_then(Value::as_integer)
            .unwrap_or(256) as u32;
        let collections = value.get("collections").and_then(Value::as_array).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_text().map(str::to_string))
                .collect()
        });
        Ok(Self {
            db_id: get_text(&value, "db_id")?,
            since_cursor: get_u64(&value, "since_cursor")?,
            limit,
            collections,
        })
    }
}

/// Server's reply to a pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct PullResponse {
    /// Operations with `server_cursor > since_cursor`, in cursor order.
    pub ops: Vec<ServerOperation>,
    /// Cursor the client should pass as `since_cursor` on its next pull.
    pub next_cursor: u64,
    /// Whether more operations remain beyond `limit`.
    pub has_more: bool,
}

impl PullResponse {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let ops = self
            .ops
            .iter()
            .map(|op| op.encode().map(Value::Bytes))
            .collect::<CodecResult<Vec<_>>>()?;
        to_canonical_cbor(&Value::map(vec![
            (Value::Text("ops".into()), Value::Array(ops)),
            (
                Value::Text("next_cursor".into()),
                Value::Integer(self.next_cursor as i64),
            ),
            (Value::Text("has_more".into()), Value::Bool(self.has_more)),
        ]))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let ops = value
            .get("ops")
            .and_then(Value::as_array)
            .ok_or_else(|| CodecError::invalid_structure("missing field `ops`"))?
            .iter()
            .map(|v| {
                let bytes = v
                    .as_bytes()
                    .ok_or_else(|| CodecError::invalid_structure("op entry must be bytes"))?;
                ServerOperation::decode(bytes)
            })
            .collect::<CodecResult<Vec<_>>>()?;
        let has_more = value.get("has_more").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self {
            ops,
            next_cursor: get_u64(&value, "next_cursor")?,
            has_more,
        })
    }
}

/// Pushes a batch of locally-committed operations to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    /// Logical database namespace.
    pub db_id: String,
    /// The pushing device's stable identifier.
    pub device_id: String,
    /// Operations to push, in local commit order.
    pub ops: Vec<Operation>,
}

impl PushRequest {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let ops = self.ops.iter().map(Operation::to_value).collect();
        to_canonical_cbor(&Value::map(vec![
            (Value::Text("db_id".into()), Value::Text(self.db_id.clone())),
            (Value::Text("device_id".into()), Value::Text(self.device_id.clone())),
            (Value::Text("ops".into()), Value::Array(ops)),
        ]))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let ops = value
            .get("ops")
            .and_then(Value::as_array)
            .ok_or_else(|| CodecError::invalid_structure("missing field `ops`"))?
            .iter()
            .map(Operation::from_value)
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self {
            db_id: get_text(&value, "db_id")?,
            device_id: get_text(&value, "device_id")?,
            ops,
        })
    }
}

/// Server's reply to a push request.
#[derive(Debug, Clone, PartialEq)]
pub struct PushResponse {
    /// The highest `op_id` (from the pushing device) fully accepted.
    pub acknowledged_up_to_op_id: u64,
    /// Conflicts for ops that were rejected instead of accepted.
    pub conflicts: Vec<Conflict>,
}

impl PushResponse {
    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let conflicts = self
            .conflicts
            .iter()
            .map(|c| c.encode().map(Value::Bytes))
            .collect::<CodecResult<Vec<_>>>()?;
        to_canonical_cbor(&Value::map(vec![
            (
                Value::Text("acknowledged_up_to_op_id".into()),
                Value::Integer(self.acknowledged_up_to_op_id as i64),
            ),
            (Value::Text("conflicts".into()), Value::Array(conflicts)),
        ]))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let conflicts = value
            .get("conflicts")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| {
                        let bytes = v
                            .as_bytes()
                            .ok_or_else(|| CodecError::invalid_structure("conflict entry must be bytes"))?;
                        Conflict::decode(bytes)
                    })
                    .collect::<CodecResult<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            acknowledged_up_to_op_id: get_u64(&value, "acknowledged_up_to_op_id")?,
            conflicts,
        })
    }
}

/// Stable error codes for the structured error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Catch-all; prefer a specific code when one applies.
    Unknown,
    /// Request body failed validation.
    InvalidRequest,
    /// Caller's credentials were missing or rejected.
    AuthenticationFailed,
    /// Caller is authenticated but not permitted for this database.
    AuthorizationFailed,
    /// `db_id` has no corresponding database on the server.
    DatabaseNotFound,
    /// Caller's protocol version is incompatible (non-retryable).
    VersionMismatch,
    /// A pushed op lost the version race; see accompanying `Conflict`.
    Conflict,
    /// Caller is being throttled; see `retry_after_seconds`.
    RateLimitExceeded,
    /// Unexpected server-side failure.
    InternalError,
    /// Server is temporarily unable to serve requests.
    ServiceUnavailable,
    /// The request did not complete within the server's deadline.
    Timeout,
    /// `since_cursor` or `expected` cursor value is invalid.
    InvalidCursor,
    /// The requested capability is not enabled on this server.
    NotSupported,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "unknown",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::AuthenticationFailed => "authentication_failed",
            ErrorCode::AuthorizationFailed => "authorization_failed",
            ErrorCode::DatabaseNotFound => "database_not_found",
            ErrorCode::VersionMismatch => "version_mismatch",
            ErrorCode::Conflict => "conflict",
            ErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::Timeout => "timeout",
            ErrorCode::InvalidCursor => "invalid_cursor",
            ErrorCode::NotSupported => "not_supported",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "invalid_request" => ErrorCode::InvalidRequest,
            "authentication_failed" => ErrorCode::AuthenticationFailed,
            "authorization_failed" => ErrorCode::AuthorizationFailed,
            "database_not_found" => ErrorCode::DatabaseNotFound,
            "version_mismatch" => ErrorCode::VersionMismatch,
            "conflict" => ErrorCode::Conflict,
            "rate_limit_exceeded" => ErrorCode::RateLimitExceeded,
            "internal_error" => ErrorCode::InternalError,
            "service_unavailable" => ErrorCode::ServiceUnavailable,
            "timeout" => ErrorCode::Timeout,
            "invalid_cursor" => ErrorCode::InvalidCursor,
            "not_supported" => ErrorCode::NotSupported,
            _ => ErrorCode::Unknown,
        }
    }

    /// Whether a caller should retry the same request after some delay.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimitExceeded
                | ErrorCode::InternalError
                | ErrorCode::ServiceUnavailable
                | ErrorCode::Timeout
        )
    }
}

/// Structured error body returned in place of a success response.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message; not stable, do not match on it.
    pub message: String,
    /// Free-form structured detail, server-defined per code.
    pub details: Option<String>,
    /// For `invalid_request`, the offending field path if identifiable.
    pub field: Option<String>,
    /// For retryable codes, a server-suggested backoff.
    pub retry_after_seconds: Option<u32>,
    /// Server-assigned id for correlating with server-side logs.
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Builds a minimal error response with just a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            field: None,
            retry_after_seconds: None,
            request_id: None,
        }
    }

    /// Encodes to the canonical binary form.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut fields = vec![
            (Value::Text("code".into()), Value::Text(self.code.as_str().into())),
            (Value::Text("message".into()), Value::Text(self.message.clone())),
        ];
        if let Some(details) = &self.details {
            fields.push((Value::Text("details".into()), Value::Text(details.clone())));
        }
        if let Some(field) = &self.field {
            fields.push((Value::Text("field".into()), Value::Text(field.clone())));
        }
        if let Some(retry_after) = self.retry_after_seconds {
            fields.push((
                Value::Text("retry_after_seconds".into()),
                Value::Integer(i64::from(retry_after)),
            ));
        }
        if let Some(request_id) = &self.request_id {
            fields.push((Value::Text("request_id".into()), Value::Text(request_id.clone())));
        }
        to_canonical_cbor(&Value::map(fields))
    }

    /// Decodes from the canonical binary form.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let value = from_cbor(bytes)?;
        let code = value
            .get("code")
            .and_then(Value::as_text)
            .map(ErrorCode::from_str)
            .unwrap_or(ErrorCode::Unknown);
        let message = get_text(&value, "message").unwrap_or_default();
        Ok(Self {
            code,
            message,
            details: value.get("details").and_then(Value::as_text).map(str::to_string),
            field: value.get("field").and_then(Value::as_text).map(str::to_string),
            retry_after_seconds: value
                .get("retry_after_seconds")
                .and_then(Value::as_integer)
                .map(|n| n as u32),
            request_id: value.get("request_id").and_then(Value::as_text).map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationType;

    #[test]
    fn handshake_round_trip() {
        let req = HandshakeRequest {
            db_id: "db1".into(),
            device_id: "dev1".into(),
            protocol_version: PROTOCOL_VERSION,
            client_info: ClientInfo {
                platform: "linux".into(),
                app_version: "1.0.0".into(),
                metadata: Some(vec![("build".into(), "abc".into())]),
            },
        };
        let decoded = HandshakeRequest::decode(&req.encode().unwrap()).unwrap();
        assert_eq!(req, decoded);

        let resp = HandshakeResponse {
            protocol_version: PROTOCOL_VERSION,
            server_cursor: 10,
            capabilities: ServerCapabilities { pull: true, push: true, channel_b: false },
            session_token: Some("tok".into()),
        };
        let decoded = HandshakeResponse::decode(&resp.encode().unwrap()).unwrap();
        assert_eq!(resp, decoded);
    }

    #[test]
    fn pull_round_trip() {
        let req = PullRequest {
            db_id: "db1".into(),
            since_cursor: 5,
            limit: 50,
            collections: Some(vec!["users".into()]),
        };
        assert_eq!(req, PullRequest::decode(&req.encode().unwrap()).unwrap());

        let op = ServerOperation {
            server_cursor: 1,
            source_device_id: "dev1".into(),
            source_op_id: 1,
            op: Operation::upsert(1, "db1", "dev1", "users", "u1", 1, vec![1], 1),
        };
        let resp = PullResponse { ops: vec![op], next_cursor: 1, has_more: false };
        assert_eq!(resp, PullResponse::decode(&resp.encode().unwrap()).unwrap());
    }

    #[test]
    fn push_round_trip() {
        let req = PushRequest {
            db_id: "db1".into(),
            device_id: "dev1".into(),
            ops: vec![Operation::delete(1, "db1", "dev1", "users", "u1", 2, 1)],
        };
        assert_eq!(req, PushRequest::decode(&req.encode().unwrap()).unwrap());
        assert_eq!(req.ops[0].op_type, OperationType::Delete);

        let resp = PushResponse { acknowledged_up_to_op_id: 1, conflicts: vec![] };
        assert_eq!(resp, PushResponse::decode(&resp.encode().unwrap()).unwrap());
    }

    #[test]
    fn error_response_round_trip() {
        let err = ErrorResponse {
            code: ErrorCode::RateLimitExceeded,
            message: "slow down".into(),
            details: None,
            field: None,
            retry_after_seconds: Some(5),
            request_id: Some("req-1".into()),
        };
        assert!(err.code.is_retryable());
        let decoded = ErrorResponse::decode(&err.encode().unwrap()).unwrap();
        assert_eq!(err, decoded);
    }

    #[test]
    fn unknown_error_code_round_trips_as_unknown() {
        assert_eq!(ErrorCode::from_str("totally_unrecognized"), ErrorCode::Unknown);
    }
}
