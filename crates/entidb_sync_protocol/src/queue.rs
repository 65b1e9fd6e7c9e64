//! Durable offline queue of not-yet-acknowledged local operations (C3).
//!
//! Physically this is an append-only log of frames over a
//! [`StorageBackend`], in the same spirit as `entidb_core`'s WAL: each
//! frame is `magic | type | len | payload | crc32`, and the queue's
//! in-memory index is rebuilt by replaying the log from offset 0 on
//! [`OfflineQueue::open`]. Acknowledgement and failure are themselves
//! frames rather than in-place edits, so the log is append-only even
//! though the logical queue is mutable.

use crate::error::{SyncProtocolError, SyncProtocolResult};
use crate::operation::Operation;
use entidb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use std::collections::BTreeMap;
use std::path::Path;

const FRAME_MAGIC: [u8; 4] = *b"EOPQ";
const FRAME_ENQUEUE: u8 = 1;
const FRAME_ACK: u8 = 2;
const FRAME_FAIL: u8 = 3;

/// What happens when [`OfflineQueue::enqueue`] is called at capacity.
///
/// The queue has a finite in-memory index; unlike the WAL it must bound
/// how much unacknowledged work it will hold for a device that never
/// reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the new operation; the caller must retry later.
    RejectNew,
    /// Drop the oldest pending operation to make room.
    EvictOldest,
}

/// A pending entry in the offline queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedOperation {
    /// The operation awaiting acknowledgement.
    pub op: Operation,
    /// How many push attempts have been made for this operation.
    pub attempts: u32,
    /// The error from the most recent failed attempt, if any.
    pub last_error: Option<String>,
}

/// Point-in-time counts describing queue occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Operations awaiting acknowledgement.
    pub pending: usize,
    /// Pending operations that have failed at least once.
    pub failed: usize,
    /// Total operations ever enqueued (including acknowledged ones).
    pub total_enqueued: u64,
}

/// A durable FIFO of locally-committed operations awaiting server
/// acknowledgement.
///
/// # Invariants
///
/// - `enqueue` preserves local commit order: operations are returned by
///   [`pending`](Self::pending) in the order they were enqueued.
/// - `acknowledge` is idempotent: acknowledging an already-acknowledged
///   or unknown `op_id` is a no-op, not an error, since a crash between
///   a server ack and persisting that ack must be safe to retry.
pub struct OfflineQueue<B: StorageBackend> {
    backend: B,
    entries: BTreeMap<u64, QueuedOperation>,
    order: Vec<u64>,
    total_enqueued: u64,
    capacity: usize,
    overflow: OverflowPolicy,
}

impl OfflineQueue<InMemoryBackend> {
    /// Opens an in-memory queue, useful for tests and ephemeral clients.
    pub fn in_memory(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self::from_backend(InMemoryBackend::new(), capacity, overflow).expect("in-memory backend never fails to open")
    }
}

impl OfflineQueue<FileBackend> {
    /// Opens (or creates) a durable queue backed by a file, replaying any
    /// existing log to rebuild the pending set.
    pub fn open(path: &Path, capacity: usize, overflow: OverflowPolicy) -> SyncProtocolResult<Self> {
        let backend = FileBackend::open(path)?;
        Self::from_backend(backend, capacity, overflow)
    }
}

impl<B: StorageBackend> OfflineQueue<B> {
    /// Opens a queue over an arbitrary backend, replaying its log.
    pub fn from_backend(backend: B, capacity: usize, overflow: OverflowPolicy) -> SyncProtocolResult<Self> {
        let mut queue = Self {
            backend,
            entries: BTreeMap::new(),
            order: Vec::new(),
            total_enqueued: 0,
            capacity,
            overflow,
        };
        queue.replay()?;
        Ok(queue)
    }

    fn replay(&mut self) -> SyncProtocolResult<()> {
        let size = self.backend.size()?;
        let mut offset = 0u64;
        while offset < size {
            let Some((frame_type, payload, next_offset)) = self.read_frame(offset, size)? else {
                break;
            };
            match frame_type {
                FRAME_ENQUEUE => {
                    let op = Operation::decode(&payload)?;
                    self.total_enqueued += 1;
                    self.order.push(op.op_id);
                    self.entries.insert(
                        op.op_id,
                        QueuedOperation {
                            op,
                            attempts: 0,
                            last_error: None,
                        },
                    );
                }
                FRAME_ACK => {
                    let op_id = read_u64(&payload)?;
                    self.entries.remove(&op_id);
                    self.order.retain(|id| *id != op_id);
                }
                FRAME_FAIL => {
                    let op_id = read_u64(&payload[..8])?;
                    let message = String::from_utf8_lossy(&payload[8..]).into_owned();
                    if let Some(entry) = self.entries.get_mut(&op_id) {
                        entry.attempts += 1;
                        entry.last_error = Some(message);
                    }
                }
                other => {
                    return Err(SyncProtocolError::QueueCorrupted(format!(
                        "unknown frame type {other}"
                    )))
                }
            }
            offset = next_offset;
        }
        Ok(())
    }

    fn read_frame(&self, offset: u64, size: u64) -> SyncProtocolResult<Option<(u8, Vec<u8>, u64)>> {
        if offset + 9 > size {
            return Ok(None);
        }
        let header = self.backend.read_at(offset, 9)?;
        if header[0..4] != FRAME_MAGIC {
            return Err(SyncProtocolError::QueueCorrupted(format!(
                "bad frame magic at offset {offset}"
            )));
        }
        let frame_type = header[4];
        let len = u32::from_le_bytes(header[5..9].try_into().unwrap()) as u64;
        let total = 9 + len + 4;
        if offset + total > size {
            return Err(SyncProtocolError::QueueCorrupted(format!(
                "truncated frame at offset {offset}"
            )));
        }
        let payload = self.backend.read_at(offset + 9, len as usize)?;
        let crc_bytes = self.backend.read_at(offset + 9 + len, 4)?;
        let expected_crc = compute_crc32(&payload);
        let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        if expected_crc != stored_crc {
            return Err(SyncProtocolError::QueueCorrupted(format!(
                "checksum mismatch at offset {offset}"
            )));
        }
        Ok(Some((frame_type, payload, offset + total)))
    }

    fn append_frame(&mut self, frame_type: u8, payload: &[u8]) -> SyncProtocolResult<()> {
        let mut frame = Vec::with_capacity(9 + payload.len() + 4);
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.push(frame_type);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&compute_crc32(payload).to_le_bytes());
        self.backend.append(&frame)?;
        self.backend.flush()?;
        Ok(())
    }

    /// Appends an operation to the queue.
    ///
    /// Returns `Err` if the queue is at capacity under
    /// [`OverflowPolicy::RejectNew`]; under [`OverflowPolicy::EvictOldest`]
    /// the oldest pending entry is dropped (and never retried) to make
    /// room.
    pub fn enqueue(&mut self, op: Operation) -> SyncProtocolResult<()> {
        if self.entries.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::RejectNew => {
                    return Err(SyncProtocolError::QueueCorrupted(
                        "offline queue at capacity".into(),
                    ))
                }
                OverflowPolicy::EvictOldest => {
                    if let Some(oldest) = self.order.first().copied() {
                        self.acknowledge(oldest)?;
                    }
                }
            }
        }
        self.append_frame(FRAME_ENQUEUE, &op.encode()?)?;
        self.total_enqueued += 1;
        self.order.push(op.op_id);
        self.entries.insert(
            op.op_id,
            QueuedOperation {
                op,
                attempts: 0,
                last_error: None,
            },
        );
        Ok(())
    }

    /// Returns pending operations in enqueue order, oldest first.
    pub fn get_pending(&self, limit: usize) -> Vec<QueuedOperation> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Removes an operation from the queue after the server has durably
    /// accepted it. Acknowledging an unknown `op_id` is a no-op.
    pub fn acknowledge(&mut self, op_id: u64) -> SyncProtocolResult<()> {
        if self.entries.remove(&op_id).is_some() {
            self.order.retain(|id| *id != op_id);
            self.append_frame(FRAME_ACK, &op_id.to_le_bytes())?;
        }
        Ok(())
    }

    /// Records a failed push attempt against an operation, keeping it
    /// pending for a later retry. Marking an unknown `op_id` is a no-op.
    pub fn mark_failed(&mut self, op_id: u64, error: impl Into<String>) -> SyncProtocolResult<()> {
        let error = error.into();
        if !self.entries.contains_key(&op_id) {
            return Ok(());
        }
        let mut payload = op_id.to_le_bytes().to_vec();
        payload.extend_from_slice(error.as_bytes());
        self.append_frame(FRAME_FAIL, &payload)?;
        if let Some(entry) = self.entries.get_mut(&op_id) {
            entry.attempts += 1;
            entry.last_error = Some(error);
        }
        Ok(())
    }

    /// Returns current occupancy counts.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.entries.len(),
            failed: self.entries.values().filter(|e| e.attempts > 0).count(),
            total_enqueued: self.total_enqueued,
        }
    }

    /// Flushes and syncs the backend, ensuring all frames are durable.
    pub fn close(mut self) -> SyncProtocolResult<()> {
        self.backend.sync()?;
        Ok(())
    }
}

fn read_u64(bytes: &[u8]) -> SyncProtocolResult<u64> {
    bytes
        .try_into()
        .map(u64::from_le_bytes)
        .map_err(|_| SyncProtocolError::QueueCorrupted("malformed op_id field".into()))
}

/// CRC32 (IEEE polynomial) for frame checksums, kept local to this crate so
/// the offline queue's durability format does not depend on
/// `entidb_core`'s internal WAL module.
fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(op_id: u64) -> Operation {
        Operation::upsert(op_id, "db1", "dev1", "users", "u1", op_id, vec![op_id as u8], 1)
    }

    #[test]
    fn enqueue_and_pending_order() {
        let mut queue = OfflineQueue::in_memory(10, OverflowPolicy::RejectNew);
        queue.enqueue(op(1)).unwrap();
        queue.enqueue(op(2)).unwrap();
        let pending = queue.get_pending(10);
        assert_eq!(pending.iter().map(|e| e.op.op_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn acknowledge_removes_entry() {
        let mut queue = OfflineQueue::in_memory(10, OverflowPolicy::RejectNew);
        queue.enqueue(op(1)).unwrap();
        queue.acknowledge(1).unwrap();
        assert_eq!(queue.get_pending(10).len(), 0);
        assert_eq!(queue.stats().total_enqueued, 1);
    }

    #[test]
    fn acknowledge_unknown_is_noop() {
        let mut queue = OfflineQueue::in_memory(10, OverflowPolicy::RejectNew);
        queue.acknowledge(999).unwrap();
    }

    #[test]
    fn mark_failed_tracks_attempts() {
        let mut queue = OfflineQueue::in_memory(10, OverflowPolicy::RejectNew);
        queue.enqueue(op(1)).unwrap();
        queue.mark_failed(1, "timed out").unwrap();
        let pending = queue.get_pending(10);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("timed out"));
        assert_eq!(queue.stats().failed, 1);
    }

    #[test]
    fn reject_new_at_capacity() {
        let mut queue = OfflineQueue::in_memory(1, OverflowPolicy::RejectNew);
        queue.enqueue(op(1)).unwrap();
        assert!(queue.enqueue(op(2)).is_err());
    }

    #[test]
    fn evict_oldest_at_capacity() {
        let mut queue = OfflineQueue::in_memory(1, OverflowPolicy::EvictOldest);
        queue.enqueue(op(1)).unwrap();
        queue.enqueue(op(2)).unwrap();
        let pending = queue.get_pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op.op_id, 2);
    }

    #[test]
    fn replay_rebuilds_state_from_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.log");

        {
            let mut queue = OfflineQueue::open(&path, 10, OverflowPolicy::RejectNew).unwrap();
            queue.enqueue(op(1)).unwrap();
            queue.enqueue(op(2)).unwrap();
            queue.acknowledge(1).unwrap();
            queue.mark_failed(2, "transient").unwrap();
            queue.close().unwrap();
        }

        let reopened = OfflineQueue::open(&path, 10, OverflowPolicy::RejectNew).unwrap();
        let pending = reopened.get_pending(10);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op.op_id, 2);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("transient"));
        assert_eq!(reopened.stats().total_enqueued, 2);
    }
}
