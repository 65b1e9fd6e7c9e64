//! Broadcast Hub (C8): fan-out of newly-accepted server operations to live
//! subscriptions.
//!
//! Has no analog in the teacher crate, which only modeled request/response
//! Pull; modeled on `handler.rs`'s `RwLock<HashMap<...>>` session registry
//! idiom, generalized to a subscription registry with an explicit,
//! documented overflow policy rather than an unbounded subscriber list.

use entidb_sync_protocol::ServerOperation;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A live sink a subscription delivers messages to.
///
/// Implementations return `false` once the underlying connection is gone;
/// the hub treats that as "closed" and removes the subscription on the
/// next broadcast or sweep rather than erroring the caller.
pub trait BroadcastSink: Send + Sync {
    /// Delivers newly-accepted operations at `cursor`.
    fn send_operations(&self, ops: &[ServerOperation], cursor: u64) -> bool;

    /// Delivers a liveness ping.
    fn send_ping(&self) -> bool;
}

/// Broadcast Hub limits and keepalive/sweep timing.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Subscriptions allowed per device before the oldest is evicted.
    pub max_per_device: usize,
    /// Subscriptions allowed across all devices before new ones are refused.
    pub max_total: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { max_per_device: 3, max_total: 1000 }
    }
}

/// Identifies one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Why [`BroadcastHub::subscribe`] was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    /// `max_total` subscriptions are already registered.
    #[error("capacity_exceeded")]
    CapacityExceeded,
}

struct Subscription {
    device_id: String,
    collection_filter: Option<Vec<String>>,
    sink: Arc<dyn BroadcastSink>,
}

/// Registry of live subscriptions, indexed by subscription id and by
/// device id, per §4.8.
pub struct BroadcastHub {
    config: BroadcastConfig,
    next_id: AtomicU64,
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    by_device: RwLock<HashMap<String, Vec<SubscriptionId>>>,
}

impl BroadcastHub {
    /// Creates an empty hub.
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            subscriptions: RwLock::new(HashMap::new()),
            by_device: RwLock::new(HashMap::new()),
        }
    }

    /// Total live subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// True if there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Registers a subscription for `device_id`, optionally filtered to
    /// `collection_filter`. Evicts the device's oldest subscription if
    /// `max_per_device` is exceeded; refuses outright if `max_total` is.
    pub fn subscribe(
        &self,
        device_id: impl Into<String>,
        collection_filter: Option<Vec<String>>,
        sink: Arc<dyn BroadcastSink>,
    ) -> Result<SubscriptionId, BroadcastError> {
        let device_id = device_id.into();

        if self.subscriptions.read().len() >= self.config.max_total {
            return Err(BroadcastError::CapacityExceeded);
        }

        let mut evicted = None;
        {
            let mut by_device = self.by_device.write();
            let ids = by_device.entry(device_id.clone()).or_default();
            if ids.len() >= self.config.max_per_device {
                evicted = Some(ids.remove(0));
            }
        }
        if let Some(id) = evicted {
            self.subscriptions.write().remove(&id);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .write()
            .insert(id, Subscription { device_id: device_id.clone(), collection_filter, sink });
        self.by_device.write().entry(device_id).or_default().push(id);
        Ok(id)
    }

    /// Removes a subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            if let Some(ids) = self.by_device.write().get_mut(&sub.device_id) {
                ids.retain(|existing| *existing != id);
            }
        }
    }

    /// Delivers `ops` (already in ascending `server_cursor` order) to every
    /// subscription whose `collection_filter` matches at least one of
    /// them. Subscriptions whose sink reports closed are removed.
    pub fn broadcast(&self, ops: &[ServerOperation], cursor: u64) {
        if ops.is_empty() {
            return;
        }
        let mut closed = Vec::new();
        for (id, sub) in self.subscriptions.read().iter() {
            let filtered: Vec<ServerOperation> = match &sub.collection_filter {
                Some(collections) => ops
                    .iter()
                    .filter(|op| collections.iter().any(|c| c == &op.op.collection))
                    .cloned()
                    .collect(),
                None => ops.to_vec(),
            };
            if filtered.is_empty() {
                continue;
            }
            if !sub.sink.send_operations(&filtered, cursor) {
                closed.push(*id);
            }
        }
        for id in closed {
            self.unsubscribe(id);
        }
    }

    /// Pings every subscription, removing any whose sink reports closed.
    /// Callers drive this on their own keepalive timer (default 30s per
    /// §4.8); the hub does not spawn one itself.
    pub fn keepalive(&self) {
        let closed: Vec<SubscriptionId> = self
            .subscriptions
            .read()
            .iter()
            .filter(|(_, sub)| !sub.sink.send_ping())
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            self.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_sync_protocol::Operation;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    struct RecordingSink {
        received: Mutex<Vec<(Vec<String>, u64)>>,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { received: Mutex::new(Vec::new()), closed: AtomicBool::new(false) })
        }
    }

    impl BroadcastSink for RecordingSink {
        fn send_operations(&self, ops: &[ServerOperation], cursor: u64) -> bool {
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            self.received
                .lock()
                .unwrap()
                .push((ops.iter().map(|op| op.op.entity_id.clone()).collect(), cursor));
            true
        }

        fn send_ping(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    fn server_op(collection: &str, entity_id: &str, cursor: u64) -> ServerOperation {
        ServerOperation {
            server_cursor: cursor,
            source_device_id: "dev1".into(),
            source_op_id: cursor,
            op: Operation::upsert(cursor, "db1", "dev1", collection, entity_id, 1, vec![1], 1),
        }
    }

    #[test]
    fn broadcasts_to_unfiltered_subscription() {
        let hub = BroadcastHub::new(BroadcastConfig::default());
        let sink = RecordingSink::new();
        hub.subscribe("dev2", None, sink.clone()).unwrap();

        hub.broadcast(&[server_op("notes", "n1", 1)], 1);
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn collection_filter_excludes_non_matching_ops() {
        let hub = BroadcastHub::new(BroadcastConfig::default());
        let sink = RecordingSink::new();
        hub.subscribe("dev2", Some(vec!["tasks".into()]), sink.clone()).unwrap();

        hub.broadcast(&[server_op("notes", "n1", 1)], 1);
        assert!(sink.received.lock().unwrap().is_empty());

        hub.broadcast(&[server_op("tasks", "t1", 2)], 2);
        assert_eq!(sink.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn per_device_limit_evicts_oldest() {
        let hub = BroadcastHub::new(BroadcastConfig { max_per_device: 2, max_total: 100 });
        let first = RecordingSink::new();
        let second = RecordingSink::new();
        let third = RecordingSink::new();

        hub.subscribe("dev1", None, first.clone()).unwrap();
        hub.subscribe("dev1", None, second.clone()).unwrap();
        hub.subscribe("dev1", None, third.clone()).unwrap();

        assert_eq!(hub.len(), 2);
        hub.broadcast(&[server_op("notes", "n1", 1)], 1);
        assert!(first.received.lock().unwrap().is_empty());
        assert_eq!(second.received.lock().unwrap().len(), 1);
        assert_eq!(third.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn total_limit_refuses_new_subscription() {
        let hub = BroadcastHub::new(BroadcastConfig { max_per_device: 100, max_total: 1 });
        hub.subscribe("dev1", None, RecordingSink::new()).unwrap();
        let result = hub.subscribe("dev2", None, RecordingSink::new());
        assert_eq!(result.unwrap_err(), BroadcastError::CapacityExceeded);
    }

    #[test]
    fn closed_sink_is_removed_on_broadcast() {
        let hub = BroadcastHub::new(BroadcastConfig::default());
        let sink = RecordingSink::new();
        sink.closed.store(true, Ordering::SeqCst);
        hub.subscribe("dev1", None, sink).unwrap();

        assert_eq!(hub.len(), 1);
        hub.broadcast(&[server_op("notes", "n1", 1)], 1);
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn keepalive_removes_closed_subscriptions() {
        let hub = BroadcastHub::new(BroadcastConfig::default());
        let sink = RecordingSink::new();
        hub.subscribe("dev1", None, sink.clone()).unwrap();
        sink.closed.store(true, Ordering::SeqCst);

        hub.keepalive();
        assert!(hub.is_empty());
    }
}
