//! Concrete Channel A binding: a framed TCP listener over [`SyncServer`].
//!
//! The sync core itself is transport-agnostic (`SyncServer::handle_*` takes
//! and returns plain protocol structs); this module is the thin adapter a
//! deployment plugs in, the same role `entidb_sync_engine::http::HttpTransport`
//! plays on the client. Rather than pull in a web framework the rest of the
//! workspace never uses, the wire format here is a minimal length-prefixed
//! frame over CBOR, matching the `entidb_codec` encoding already used
//! end-to-end by the protocol types:
//!
//! request:  `[1-byte endpoint tag][4-byte big-endian length][CBOR payload]`
//! response: `[1-byte status][4-byte big-endian length][CBOR payload]`
//!
//! Endpoint tags are `0 = handshake`, `1 = pull`, `2 = push`. Status is
//! `0 = ok` (payload is the matching response type) or `1 = error` (payload
//! is an [`entidb_sync_protocol::ErrorResponse`]).

use crate::server::SyncServer;
use entidb_codec::CodecResult;
use entidb_sync_protocol::{
    ErrorResponse, HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Forwards a message type's inherent `encode`/`decode` pair so `dispatch`
/// can stay generic over the three request/response shapes.
trait WireCodec: Sized {
    fn encode_wire(&self) -> CodecResult<Vec<u8>>;
    fn decode_wire(bytes: &[u8]) -> CodecResult<Self>;
}

macro_rules! impl_wire_codec {
    ($t:ty) => {
        impl WireCodec for $t {
            fn encode_wire(&self) -> CodecResult<Vec<u8>> {
                self.encode()
            }
            fn decode_wire(bytes: &[u8]) -> CodecResult<Self> {
                Self::decode(bytes)
            }
        }
    };
}

impl_wire_codec!(HandshakeRequest);
impl_wire_codec!(HandshakeResponse);
impl_wire_codec!(PullRequest);
impl_wire_codec!(PullResponse);
impl_wire_codec!(PushRequest);
impl_wire_codec!(PushResponse);
impl_wire_codec!(ErrorResponse);

const TAG_HANDSHAKE: u8 = 0;
const TAG_PULL: u8 = 1;
const TAG_PUSH: u8 = 2;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

/// Runs the framed-TCP sync server until the process is killed or the
/// listener errors.
///
/// Accepts connections forever, handling each on its own task so a slow or
/// stalled client can't block other devices from syncing.
pub async fn serve_tcp(server: Arc<SyncServer>, addr: SocketAddr) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "sync server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(server, stream).await {
                tracing::warn!(%peer, error = %e, "sync connection closed with error");
            }
        });
    }
}

async fn handle_connection(server: Arc<SyncServer>, mut stream: TcpStream) -> io::Result<()> {
    loop {
        let tag = match stream.read_u8().await {
            Ok(tag) => tag,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let len = stream.read_u32().await?;
        let mut payload = vec![0u8; len as usize];
        stream.read_exact(&mut payload).await?;

        let response_frame = dispatch(&server, tag, &payload);
        stream.write_all(&response_frame).await?;
    }
}

fn dispatch(server: &SyncServer, tag: u8, payload: &[u8]) -> Vec<u8> {
    match tag {
        TAG_HANDSHAKE => respond(HandshakeRequest::decode_wire(payload), |req| server.handle_handshake(req)),
        TAG_PULL => respond(PullRequest::decode_wire(payload), |req| server.handle_pull(req)),
        TAG_PUSH => respond(PushRequest::decode_wire(payload), |req| server.handle_push(req)),
        other => error_frame(&ErrorResponse::new(
            entidb_sync_protocol::ErrorCode::InvalidRequest,
            format!("unknown endpoint tag {other}"),
        )),
    }
}

fn respond<Req, Res>(
    decoded: CodecResult<Req>,
    handle: impl FnOnce(Req) -> crate::error::ServerResult<Res>,
) -> Vec<u8>
where
    Res: WireCodec,
{
    let request = match decoded {
        Ok(request) => request,
        Err(e) => {
            return error_frame(&ErrorResponse::new(
                entidb_sync_protocol::ErrorCode::InvalidRequest,
                format!("malformed request: {e}"),
            ))
        }
    };

    match handle(request) {
        Ok(response) => ok_frame(&response),
        Err(e) => error_frame(&e.to_error_response()),
    }
}

fn ok_frame<T: WireCodec>(value: &T) -> Vec<u8> {
    frame(STATUS_OK, &value.encode_wire().expect("response encoding is infallible for well-formed values"))
}

fn error_frame(error: &ErrorResponse) -> Vec<u8> {
    frame(STATUS_ERROR, &error.encode_wire().expect("error response encoding is infallible"))
}

fn frame(status: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(status);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use entidb_sync_protocol::ClientInfo;

    #[test]
    fn ok_frame_round_trips_handshake_response() {
        let response = HandshakeResponse {
            protocol_version: entidb_sync_protocol::PROTOCOL_VERSION,
            server_cursor: 7,
            capabilities: Default::default(),
            session_token: None,
        };
        let bytes = ok_frame(&response);
        assert_eq!(bytes[0], STATUS_OK);
        let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let decoded = HandshakeResponse::decode(&bytes[5..5 + len]).unwrap();
        assert_eq!(decoded.server_cursor, 7);
    }

    #[test]
    fn dispatch_routes_by_tag() {
        let server = SyncServer::in_memory(ServerConfig::default(), "db1").unwrap();
        let request = HandshakeRequest::new("db1", "dev1", ClientInfo::default());
        let bytes = dispatch(&server, TAG_HANDSHAKE, &request.encode().unwrap());
        assert_eq!(bytes[0], STATUS_OK);
    }

    #[test]
    fn dispatch_reports_unknown_db_as_error_frame() {
        let server = SyncServer::in_memory(ServerConfig::default(), "db1").unwrap();
        let request = HandshakeRequest::new("wrong-db", "dev1", ClientInfo::default());
        let bytes = dispatch(&server, TAG_HANDSHAKE, &request.encode().unwrap());
        assert_eq!(bytes[0], STATUS_ERROR);
    }

    #[test]
    fn dispatch_unknown_tag_is_error_frame() {
        let server = SyncServer::in_memory(ServerConfig::default(), "db1").unwrap();
        let bytes = dispatch(&server, 99, &[]);
        assert_eq!(bytes[0], STATUS_ERROR);
    }
}
