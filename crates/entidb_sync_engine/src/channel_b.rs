//! Channel B (C5): a long-lived bidirectional connection carrying typed
//! messages, used for server-pushed notifications and correlated
//! Pull/Push requests without the overhead of a fresh Channel A
//! handshake per call.
//!
//! Has no analog in the teacher crate — `entidb_sync_engine::transport`
//! only models Channel A (request/response). This is modeled on the same
//! trait-for-testability shape: a [`BidiChannel`] trait that production
//! code implements over a WebSocket (out of scope here — transport-level
//! detail) and tests implement with [`LoopbackBidiChannel`], a pair of
//! ends connected by a `tokio::sync::mpsc` channel.

use entidb_sync_protocol::{PullRequest, PullResponse, PushRequest, PushResponse, ServerOperation};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message exchanged on Channel B.
#[derive(Debug, Clone)]
pub enum ChannelBMessage {
    /// Client asks to subscribe to a database's change stream.
    Subscribe {
        /// Logical database namespace.
        db_id: String,
        /// Stable identifier of the subscribing device.
        device_id: String,
    },
    /// Server confirms a subscription and reports its current cursor.
    Subscribed {
        /// The server's cursor at subscription time.
        server_cursor: u64,
    },
    /// Server pushes newly-committed operations without being asked.
    Operations {
        /// The pushed operations, in ascending server-cursor order.
        ops: Vec<ServerOperation>,
    },
    /// Client acknowledges operations up to and including this cursor.
    Ack {
        /// Highest server cursor the client has durably applied.
        up_to_op_id: u64,
    },
    /// A Pull request issued over Channel B rather than Channel A.
    Pull {
        /// Correlates the eventual `PullResponse`.
        correlation_id: u64,
        /// The request payload.
        request: PullRequest,
    },
    /// The response to a correlated [`ChannelBMessage::Pull`].
    PullResponse {
        /// Matches the request's correlation id.
        correlation_id: u64,
        /// The response payload.
        response: PullResponse,
    },
    /// A Push request issued over Channel B rather than Channel A.
    Push {
        /// Correlates the eventual `PushResponse`.
        correlation_id: u64,
        /// The request payload.
        request: PushRequest,
    },
    /// The response to a correlated [`ChannelBMessage::Push`].
    PushResponse {
        /// Matches the request's correlation id.
        correlation_id: u64,
        /// The response payload.
        response: PushResponse,
    },
    /// Liveness probe; the receiver must reply with [`ChannelBMessage::Pong`].
    Ping {
        /// Correlates the eventual `Pong`.
        correlation_id: u64,
    },
    /// Reply to a [`ChannelBMessage::Ping`].
    Pong {
        /// Matches the ping's correlation id.
        correlation_id: u64,
    },
    /// Either side rejects a message (e.g. it was oversize) and is about
    /// to close the connection.
    Error {
        /// Correlation id of the offending message, if any.
        correlation_id: Option<u64>,
        /// Human-readable description.
        message: String,
    },
}

/// Maximum encoded message size before it is rejected per §Message framing
/// (default 1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Keepalive timing for Channel B.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// How often each side issues a `Ping`. Default 30s.
    pub ping_interval: Duration,
    /// How long to wait for a `Pong` before closing. Default 10s.
    pub pong_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Reconnect backoff for Channel B.
///
/// Distinct from [`crate::config::RetryConfig`]: the spec gives Channel B
/// its own formula (`initial_delay · 2^clamp(attempts,0,5)`, no jitter)
/// rather than Channel A's jittered exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Computes the delay before reconnect attempt `attempts` (0-indexed).
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let exponent = attempts.min(5);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// A long-lived bidirectional channel carrying [`ChannelBMessage`]s.
///
/// Production implementations bind this to a WebSocket or similar; tests
/// use [`LoopbackBidiChannel`].
pub trait BidiChannel: Send + Sync {
    /// Sends a message. Returns an error if the channel is closed.
    fn send(&self, message: ChannelBMessage) -> Result<(), ChannelBError>;

    /// Blocks until a message arrives or `timeout` elapses.
    ///
    /// Returns `Ok(None)` on timeout (not an error: the caller typically
    /// uses this to drive its own ping schedule).
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<ChannelBMessage>, ChannelBError>;

    /// True while the channel is open.
    fn is_open(&self) -> bool;

    /// Closes the channel. Idempotent.
    fn close(&self);
}

/// Error from a [`BidiChannel`] operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelBError {
    /// The channel has been closed.
    #[error("channel closed")]
    Closed,
    /// An encoded message exceeded the configured size limit.
    #[error("message of {size} bytes exceeds the {limit}-byte limit")]
    MessageTooLarge {
        /// The offending message's encoded size.
        size: usize,
        /// The configured limit.
        limit: usize,
    },
}

/// One end of an in-process loopback `BidiChannel`, backed by a pair of
/// `tokio::sync::mpsc` unbounded channels — one per direction.
///
/// [`LoopbackBidiChannel::pair`] returns both ends already wired together,
/// mirroring how [`crate::http::LoopbackClient`] stands in for Channel A
/// in tests.
pub struct LoopbackBidiChannel {
    tx: mpsc::UnboundedSender<ChannelBMessage>,
    rx: parking_lot::Mutex<mpsc::UnboundedReceiver<ChannelBMessage>>,
    open: std::sync::atomic::AtomicBool,
}

impl LoopbackBidiChannel {
    /// Creates two ends of a loopback channel, wired to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        let a = Self {
            tx: tx_a,
            rx: parking_lot::Mutex::new(rx_a),
            open: std::sync::atomic::AtomicBool::new(true),
        };
        let b = Self {
            tx: tx_b,
            rx: parking_lot::Mutex::new(rx_b),
            open: std::sync::atomic::AtomicBool::new(true),
        };
        (a, b)
    }
}

impl BidiChannel for LoopbackBidiChannel {
    fn send(&self, message: ChannelBMessage) -> Result<(), ChannelBError> {
        if !self.is_open() {
            return Err(ChannelBError::Closed);
        }
        self.tx.send(message).map_err(|_| ChannelBError::Closed)
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<ChannelBMessage>, ChannelBError> {
        if !self.is_open() {
            return Err(ChannelBError::Closed);
        }
        let mut rx = self.rx.lock();
        match rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => {
                std::thread::sleep(timeout.min(Duration::from_millis(50)));
                match rx.try_recv() {
                    Ok(message) => Ok(Some(message)),
                    Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                    Err(mpsc::error::TryRecvError::Disconnected) => Err(ChannelBError::Closed),
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ChannelBError::Closed),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_backoff_clamps_exponent() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(5), Duration::from_millis(16_000));
        // attempts beyond 5 clamp to the same exponent, then the delay cap applies.
        assert_eq!(config.delay_for_attempt(9), Duration::from_millis(16_000));
    }

    #[test]
    fn reconnect_backoff_respects_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn loopback_channel_delivers_messages_both_ways() {
        let (a, b) = LoopbackBidiChannel::pair();
        a.send(ChannelBMessage::Subscribe {
            db_id: "db1".into(),
            device_id: "dev1".into(),
        })
        .unwrap();

        let received = b.recv_timeout(Duration::from_millis(200)).unwrap();
        assert!(matches!(received, Some(ChannelBMessage::Subscribe { .. })));

        b.send(ChannelBMessage::Subscribed { server_cursor: 7 }).unwrap();
        let received = a.recv_timeout(Duration::from_millis(200)).unwrap();
        assert!(matches!(received, Some(ChannelBMessage::Subscribed { server_cursor: 7 })));
    }

    #[test]
    fn recv_timeout_returns_none_when_idle() {
        let (a, _b) = LoopbackBidiChannel::pair();
        let received = a.recv_timeout(Duration::from_millis(10)).unwrap();
        assert!(received.is_none());
    }

    #[test]
    fn closed_channel_rejects_send_and_recv() {
        let (a, b) = LoopbackBidiChannel::pair();
        a.close();
        assert!(!a.is_open());
        assert!(matches!(a.send(ChannelBMessage::Ping { correlation_id: 1 }), Err(ChannelBError::Closed)));

        // The peer still sees the channel as open locally, but the sender
        // half is gone once `a` is dropped along with its receiver lock;
        // closing only affects the side that called it.
        assert!(b.is_open());
    }
}
