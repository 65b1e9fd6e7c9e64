//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the sync engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.).

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use entidb_sync_protocol::{
    HandshakeRequest, HandshakeResponse, PullRequest, PullResponse, PushRequest, PushResponse,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// A failed HTTP attempt, with enough information for the caller to decide
/// whether retrying makes sense.
#[derive(Debug, Clone)]
pub struct HttpError {
    /// Human-readable failure description.
    pub message: String,
    /// Whether the same request might succeed on a later attempt. A `4xx`
    /// response should set this to `false`; connection failures and `5xx`
    /// responses should set it to `true`.
    pub retryable: bool,
}

impl HttpError {
    /// Builds a retryable error, e.g. for connection failures or `5xx`.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Builds a non-retryable error, e.g. for `4xx` responses.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport.
/// This allows using different HTTP libraries (reqwest, hyper, ureq, etc.)
/// or even non-HTTP transports (WebSocket, gRPC).
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
///
/// Uses CBOR encoding for request/response bodies over the `/v1/*`
/// endpoints and retries retryable failures with the configured backoff.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Retry policy applied to failed requests before giving up.
    retry: RetryConfig,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport with the default retry policy.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self::with_retry(base_url, client, RetryConfig::default())
    }

    /// Creates a new HTTP transport with an explicit retry policy.
    pub fn with_retry(base_url: impl Into<String>, client: C, retry: RetryConfig) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            retry,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().unwrap().clone()
    }

    fn set_error(&self, err: &str) {
        *self.last_error.write().unwrap() = Some(err.to_string());
    }

    fn clear_error(&self) {
        *self.last_error.write().unwrap() = None;
    }

    fn post_cbor<Req, Res>(&self, endpoint: &str, request: &Req) -> SyncResult<Res>
    where
        Req: CborEncode,
        Res: CborDecode,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request
            .encode_cbor()
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {e}")))?;
        let url = format!("{}{}", self.base_url, endpoint);

        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay_for_attempt(attempt));
            }

            match self.client.post(&url, body.clone()) {
                Ok(response_body) => {
                    self.clear_error();
                    return Res::decode_cbor(&response_body)
                        .map_err(|e| SyncError::Protocol(format!("failed to decode response: {e}")));
                }
                Err(e) => {
                    self.set_error(&e.message);
                    if !e.retryable {
                        self.connected.store(false, Ordering::SeqCst);
                        return Err(SyncError::transport_fatal(e.message));
                    }
                    last_err = Some(e.message);
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        Err(SyncError::transport_retryable(
            last_err.unwrap_or_else(|| "request failed".into()),
        ))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn handshake(&self, request: &HandshakeRequest) -> SyncResult<HandshakeResponse> {
        self.post_cbor("/v1/handshake", request)
    }

    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.post_cbor("/v1/pull", request)
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post_cbor("/v1/push", request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for CBOR encoding.
pub trait CborEncode {
    /// Encodes self to CBOR bytes.
    fn encode_cbor(&self) -> Result<Vec<u8>, String>;
}

/// Trait for CBOR decoding.
pub trait CborDecode: Sized {
    /// Decodes self from CBOR bytes.
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String>;
}

impl CborEncode for HandshakeRequest {
    fn encode_cbor(&self) -> Result<Vec<u8>, String> {
        self.encode().map_err(|e| e.to_string())
    }
}

impl CborEncode for PullRequest {
    fn encode_cbor(&self) -> Result<Vec<u8>, String> {
        self.encode().map_err(|e| e.to_string())
    }
}

impl CborEncode for PushRequest {
    fn encode_cbor(&self) -> Result<Vec<u8>, String> {
        self.encode().map_err(|e| e.to_string())
    }
}

impl CborDecode for HandshakeResponse {
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}

impl CborDecode for PullResponse {
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}

impl CborDecode for PushResponse {
    fn decode_cbor(bytes: &[u8]) -> Result<Self, String> {
        Self::decode(bytes).map_err(|e| e.to_string())
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, HttpError>;
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, HttpError> {
        let path = url.find("/v1/").map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
