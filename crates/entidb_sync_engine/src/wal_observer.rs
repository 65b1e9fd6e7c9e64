//! Write-ahead log observer (C2).
//!
//! Rather than hooking into every write path, the observer tails the same
//! WAL the database already writes for crash recovery — the way
//! `entidb_core`'s own startup recovery tails it — and turns committed
//! local writes into queued sync operations via [`DatabaseApplier`].
//!
//! Collections whose name starts with `_` are treated as internal (the
//! sync engine's own `_sync_meta` collection among them) and are never
//! observed, so the applier's own bookkeeping writes don't loop back into
//! the offline queue.

use crate::db_applier::{entity_id_to_string, DatabaseApplier};
use crate::error::{SyncError, SyncResult};
use entidb_core::{CollectionId, WalRecord};
use entidb_storage::StorageBackend;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default cap on operations enqueued per [`WalObserver::poll`] call.
///
/// The observer holds buffered per-transaction writes in memory while it
/// scans; this bounds that memory and bounds how long a single `poll` can
/// run against a long WAL. Overflow policy is "pause and resume": once the
/// cap is hit, `poll` stops at the last fully-committed transaction it
/// processed and persists its cursor there, so the next call picks up
/// exactly where this one left off.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

const CURSOR_MAGIC: [u8; 4] = *b"EWOC";
const CURSOR_TEMP_SUFFIX: &str = ".tmp";

/// Pending write collected for an open transaction, awaiting its commit
/// record to learn the sequence number it should be versioned at.
struct PendingWrite {
    collection_id: CollectionId,
    entity_id: [u8; 16],
    entity_cbor: Option<Vec<u8>>,
}

/// Observes a database's WAL and feeds committed local writes into a
/// [`DatabaseApplier`]'s offline queue.
///
/// Resumes from the last WAL offset it fully processed across restarts by
/// persisting a small cursor file next to the database, using the same
/// write-then-rename pattern `entidb_core` uses for its manifest.
pub struct WalObserver<B: StorageBackend> {
    applier: Arc<DatabaseApplier<B>>,
    db_id: String,
    device_id: String,
    cursor_path: Option<PathBuf>,
    last_offset: AtomicU64,
    buffer_capacity: usize,
}

impl<B: StorageBackend> WalObserver<B> {
    /// Creates an observer starting from the beginning of the WAL.
    pub fn new(applier: Arc<DatabaseApplier<B>>, db_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            applier,
            db_id: db_id.into(),
            device_id: device_id.into(),
            cursor_path: None,
            last_offset: AtomicU64::new(0),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Persists (and, if present, resumes from) a cursor file at `path`.
    pub fn with_cursor_file(mut self, path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        if let Some(offset) = read_cursor(&path)? {
            self.last_offset.store(offset, Ordering::SeqCst);
        }
        self.cursor_path = Some(path);
        Ok(self)
    }

    /// Overrides the per-`poll` buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    /// The WAL offset this observer will resume scanning from on its next
    /// [`poll`](Self::poll) call.
    pub fn cursor(&self) -> u64 {
        self.last_offset.load(Ordering::SeqCst)
    }

    /// Scans new WAL records since the last call and records any local,
    /// non-internal writes with the applier.
    ///
    /// Returns the number of operations enqueued. A return value equal to
    /// [`Self::buffer_capacity`] hints there may be more to process; call
    /// again to keep draining.
    pub fn poll(&self) -> SyncResult<usize> {
        let database = self.applier.database();
        let manifest = database.get_manifest();
        let internal_ids: std::collections::HashSet<u32> = manifest
            .collections
            .iter()
            .filter(|(name, _)| name.starts_with('_'))
            .map(|(_, id)| *id)
            .collect();

        let start_offset = self.last_offset.load(Ordering::SeqCst);
        let iter = database.wal().iter_from(start_offset).map_err(SyncError::Database)?;

        let mut open_txns: HashMap<u64, Vec<PendingWrite>> = HashMap::new();
        let mut enqueued = 0usize;
        let mut resume_at = start_offset;

        for record in iter {
            let (offset, record) = record.map_err(SyncError::Database)?;
            match record {
                WalRecord::Begin { txid } => {
                    open_txns.entry(txid.as_u64()).or_default();
                }
                WalRecord::Put {
                    txid,
                    collection_id,
                    entity_id,
                    after_bytes,
                    ..
                } => {
                    open_txns.entry(txid.as_u64()).or_default().push(PendingWrite {
                        collection_id,
                        entity_id,
                        entity_cbor: Some(after_bytes),
                    });
                }
                WalRecord::Delete {
                    txid,
                    collection_id,
                    entity_id,
                    ..
                } => {
                    open_txns.entry(txid.as_u64()).or_default().push(PendingWrite {
                        collection_id,
                        entity_id,
                        entity_cbor: None,
                    });
                }
                WalRecord::Abort { txid } => {
                    open_txns.remove(&txid.as_u64());
                }
                WalRecord::Commit { txid, sequence } => {
                    if let Some(writes) = open_txns.remove(&txid.as_u64()) {
                        for write in writes {
                            if internal_ids.contains(&write.collection_id.0) {
                                continue;
                            }
                            let Some(collection) = manifest.collections.iter().find_map(|(name, id)| {
                                (*id == write.collection_id.0).then(|| name.clone())
                            }) else {
                                continue;
                            };
                            self.applier.record_local_change(
                                self.db_id.clone(),
                                self.device_id.clone(),
                                collection,
                                entity_id_to_string(write.entity_id.into()),
                                sequence.as_u64(),
                                write.entity_cbor,
                                now_millis(),
                            )?;
                            enqueued += 1;
                        }
                    }
                    resume_at = offset;
                    if enqueued >= self.buffer_capacity {
                        break;
                    }
                }
                WalRecord::Checkpoint { .. } => {}
            }
        }

        self.last_offset.store(resume_at, Ordering::SeqCst);
        if let Some(path) = &self.cursor_path {
            write_cursor(path, resume_at)?;
        }
        Ok(enqueued)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn read_cursor(path: &Path) -> SyncResult<Option<u64>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).map_err(|e| SyncError::Protocol(format!("reading cursor file: {e}")))?;
    if data.len() != 12 || data[0..4] != CURSOR_MAGIC {
        return Err(SyncError::Protocol("corrupt wal observer cursor file".into()));
    }
    let offset = u64::from_le_bytes(data[4..12].try_into().unwrap());
    Ok(Some(offset))
}

fn write_cursor(path: &Path, offset: u64) -> SyncResult<()> {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&CURSOR_MAGIC);
    data.extend_from_slice(&offset.to_le_bytes());

    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(CURSOR_TEMP_SUFFIX);
    let temp_path = path.with_file_name(temp_name);

    fs::write(&temp_path, &data).map_err(|e| SyncError::Protocol(format!("writing cursor file: {e}")))?;
    fs::rename(&temp_path, path).map_err(|e| SyncError::Protocol(format!("renaming cursor file: {e}")))?;
    Ok(())
}
