//! WAL writer and reader.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, WalRecord, WAL_MAGIC, WAL_VERSION};
use entidb_storage::StorageBackend;
use parking_lot::Mutex;
use std::sync::Arc;

/// Header size for WAL records.
/// magic (4) + version (2) + type (1) + length (4) = 11 bytes
const HEADER_SIZE: usize = 11;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Manages WAL writes and reads.
///
/// The `WalManager` provides append-only writes to the WAL and supports
/// reading records for recovery.
pub struct WalManager {
    /// Storage backend for WAL data.
    backend: Arc<Mutex<Box<dyn StorageBackend>>>,
    /// Whether to sync after each write.
    sync_on_write: bool,
}

impl WalManager {
    /// Creates a new WAL manager.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            sync_on_write,
        }
    }

    /// Appends a record to the WAL.
    ///
    /// Returns the offset where the record was written.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The record payload exceeds the maximum size (4 GiB)
    /// - I/O errors occur during write
    pub fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        let payload = record.encode_payload()?;
        let record_type = record.record_type();

        // Build the full record with envelope
        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);

        // Magic
        data.extend_from_slice(&WAL_MAGIC);

        // Version
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());

        // Type
        data.push(record_type.as_byte());

        // Length (payload length)
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;
        data.extend_from_slice(&len.to_le_bytes());

        // Payload
        data.extend_from_slice(&payload);

        // CRC32 (over everything before it)
        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        // Write atomically
        let mut backend = self.backend.lock();
        let offset = backend.append(&data)?;

        if self.sync_on_write {
            backend.flush()?;
        }

        Ok(offset)
    }

    /// Flushes all pending writes to durable storage.
    pub fn flush(&self) -> CoreResult<()> {
        self.backend.lock().flush()?;
        Ok(())
    }

    /// Returns the current WAL size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Returns a streaming iterator over WAL records.
    ///
    /// This is the preferred method for reading WAL records as it uses
    /// O(1) memory regardless of WAL size. Records are read one-by-one
    /// from the storage backend.
    ///
    /// # Example
    ///
    /// ```ignore
    /// for result in wal.iter()? {
    ///     let (offset, record) = result?;
    ///     // Process record...
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<super::WalRecordIterator<'_>> {
        let backend = self.backend.lock();
        super::WalRecordIterator::new(backend, 0)
    }

    /// Returns a streaming iterator starting at a given byte offset.
    ///
    /// Used by consumers that persist a watermark offset and only want to
    /// rescan the tail of the WAL on each pass, rather than the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter_from(&self, start_offset: u64) -> CoreResult<super::WalRecordIterator<'_>> {
        let backend = self.backend.lock();
        super::WalRecordIterator::new(backend, start_offset)
    }

    /// Iterates over records with a streaming callback.
    ///
    /// This is more memory-efficient than `read_all` for large WALs.
    /// The callback receives each record and returns `Ok(true)` to continue
    /// or `Ok(false)` to stop iteration early.
    ///
    /// # Arguments
    ///
    /// * `callback` - Function called for each record. Returns `Ok(true)` to
    ///   continue, `Ok(false)` to stop, or `Err(...)` to abort with error.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or the callback returns an error.
    pub fn for_each_streaming<F>(&self, mut callback: F) -> CoreResult<()>
    where
        F: FnMut(u64, WalRecord) -> CoreResult<bool>,
    {
        for result in self.iter()? {
            let (offset, record) = result?;
            if !callback(offset, record)? {
                break;
            }
        }
        Ok(())
    }

    /// Reads all records from the WAL.
    ///
    /// **Note:** For large WALs, prefer using `iter()` which streams records
    /// with O(1) memory usage.
    ///
    /// This method is retained for backwards compatibility and for cases where
    /// having all records in memory is acceptable (small WALs, testing).
    pub fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        self.iter()?.collect()
    }

    /// Iterates over records, calling the callback for each.
    ///
    /// **Deprecated:** Use `for_each_streaming` instead for true streaming behavior.
    /// This method is retained for backwards compatibility.
    #[deprecated(
        since = "0.1.0",
        note = "Use for_each_streaming() for true streaming behavior"
    )]
    pub fn for_each<F>(&self, callback: F) -> CoreResult<()>
    where
        F: FnMut(u64, WalRecord) -> CoreResult<bool>,
    {
        self.for_each_streaming(callback)
    }

    /// Truncates the WAL to the specified offset.
    ///
    /// This is used after checkpoint to reclaim space. All data after
    /// the specified offset is discarded.
    ///
    /// # Arguments
    ///
    /// * `offset` - The offset to truncate to (all data after this is removed)
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(offset)?;
        Ok(())
    }

    /// Clears all data from the WAL.
    ///
    /// This truncates the WAL to 0 bytes. Used after checkpoint when
    /// all committed transactions have been flushed to segments.
    pub fn clear(&self) -> CoreResult<()> {
        self.truncate(0)
    }

    /// Returns the backend for testing purposes.
    ///
    /// This allows tests to directly manipulate the underlying storage
    /// to simulate crash scenarios like truncated writes or corruption.
    #[cfg(test)]
    pub(crate) fn get_backend_for_testing(&self) -> Arc<Mutex<Box<dyn StorageBackend>>> {
        Arc::clone(&self.backend)
    }
}

impl std::fmt::Debug for WalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalManager")
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}
