//! Sync engine state machine (C4).

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use entidb_sync_protocol::{
    Conflict, ConflictResolver, HandshakeRequest, Operation, PullRequest, PushRequest,
    ServerOperation,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Engine is connecting to the server.
    Connecting,
    /// Engine is pulling changes from the server.
    Pulling,
    /// Engine is pushing changes to the server.
    Pushing,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Connecting | SyncState::Pulling | SyncState::Pushing
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of operations pulled.
    pub operations_pulled: u64,
    /// Total number of operations pushed.
    pub operations_pushed: u64,
    /// Total number of conflicts encountered.
    pub conflicts_encountered: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
///
/// Unlike the source's model, a conflict never aborts the cycle: every
/// conflict returned by a push is run through the configured
/// [`ConflictResolver`] before the cycle finishes, so `conflicts` here
/// records what happened, not what is still pending.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Number of operations pulled.
    pub pulled: u64,
    /// Number of operations pushed and acknowledged.
    pub pushed: u64,
    /// Conflicts surfaced by the push, already resolved.
    pub conflicts: Vec<Conflict>,
    /// Whether the sync cycle completed without a fatal error.
    pub success: bool,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// Callback for applying remote operations to the local database.
pub trait SyncApplier: Send + Sync {
    /// Applies a batch of operations accepted by the server.
    fn apply_remote_operations(&self, operations: &[ServerOperation]) -> SyncResult<()>;

    /// Gets pending local operations to push.
    fn get_pending_operations(&self, limit: u32) -> SyncResult<Vec<Operation>>;

    /// Marks operations as acknowledged (pushed successfully).
    fn acknowledge_operations(&self, up_to_op_id: u64) -> SyncResult<()>;

    /// Gets the current server cursor.
    fn get_server_cursor(&self) -> SyncResult<u64>;

    /// Sets the server cursor after a successful pull.
    fn set_server_cursor(&self, cursor: u64) -> SyncResult<()>;

    /// Applies the outcome of resolving one conflict.
    ///
    /// `resolution` is the resolver's verdict: `Some(op)` re-enqueues `op`
    /// for push on the next cycle, `None` means the server's version wins
    /// and the local pending op for this entity should be dropped.
    fn resolve_conflict(&self, conflict: &Conflict, resolution: Option<Operation>) -> SyncResult<()>;
}

/// The sync engine manages synchronization with a remote server.
pub struct SyncEngine<T: SyncTransport, A: SyncApplier> {
    config: SyncConfig,
    transport: Arc<T>,
    applier: Arc<A>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    conflict_resolver: RwLock<ConflictResolver>,
    cancelled: std::sync::atomic::AtomicBool,
    current_retry: AtomicU64,
}

impl<T: SyncTransport, A: SyncApplier> SyncEngine<T, A> {
    /// Creates a new sync engine with the `server_wins` conflict resolver.
    pub fn new(config: SyncConfig, transport: T, applier: A) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            applier: Arc::new(applier),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            conflict_resolver: RwLock::new(entidb_sync_protocol::server_wins()),
            cancelled: std::sync::atomic::AtomicBool::new(false),
            current_retry: AtomicU64::new(0),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Replaces the conflict resolver used for subsequent cycles.
    pub fn set_conflict_resolver(&self, resolver: ConflictResolver) {
        *self.conflict_resolver.write() = resolver;
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Checks if sync was cancelled.
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sets the state.
    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Performs a full sync cycle: handshake, pull, then push.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        self.reset_cancel();

        if !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        }

        let mut result = SyncCycleResult {
            pulled: 0,
            pushed: 0,
            conflicts: Vec::new(),
            success: false,
            duration: Duration::ZERO,
        };

        self.set_state(SyncState::Connecting);
        if let Err(e) = self.handshake() {
            self.handle_error(&e);
            result.duration = start.elapsed();
            return Err(e);
        }

        self.check_cancelled()?;

        self.set_state(SyncState::Pulling);
        match self.pull_all() {
            Ok(count) => result.pulled = count,
            Err(e) => {
                self.handle_error(&e);
                result.duration = start.elapsed();
                return Err(e);
            }
        }

        self.check_cancelled()?;

        self.set_state(SyncState::Pushing);
        match self.push_all() {
            Ok((count, conflicts)) => {
                result.pushed = count;
                self.resolve_conflicts(conflicts, &mut result)?;
            }
            Err(e) => {
                self.handle_error(&e);
                result.duration = start.elapsed();
                return Err(e);
            }
        }

        result.success = true;
        result.duration = start.elapsed();
        self.set_state(SyncState::Synced);
        self.current_retry.store(0, Ordering::SeqCst);

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.operations_pulled += result.pulled;
            stats.operations_pushed += result.pushed;
            stats.conflicts_encountered += result.conflicts.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }

        Ok(result)
    }

    /// Performs a sync with retry on transient errors.
    ///
    /// A [`SyncError::VersionMismatch`] is never retried: it reports a
    /// handshake incompatibility that a later attempt cannot fix.
    pub fn sync_with_retry(&self) -> SyncResult<SyncCycleResult> {
        let retry_config = &self.config.retry;
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry_config.delay_for_attempt(attempt);
                std::thread::sleep(delay);
                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;
            self.current_retry.store(attempt as u64, Ordering::SeqCst);

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    fn handshake(&self) -> SyncResult<()> {
        let request = HandshakeRequest {
            db_id: self.config.db_id.clone(),
            device_id: self.config.device_id.clone(),
            protocol_version: entidb_sync_protocol::PROTOCOL_VERSION,
            client_info: entidb_sync_protocol::ClientInfo::default(),
        };
        let response = self.transport.handshake(&request)?;
        if response.protocol_version != entidb_sync_protocol::PROTOCOL_VERSION {
            return Err(SyncError::VersionMismatch);
        }
        Ok(())
    }

    /// Pulls all available changes from the server.
    fn pull_all(&self) -> SyncResult<u64> {
        let mut total_pulled = 0u64;

        loop {
            self.check_cancelled()?;

            let since_cursor = self.applier.get_server_cursor()?;
            let request = PullRequest {
                db_id: self.config.db_id.clone(),
                since_cursor,
                limit: self.config.pull_batch_size,
                collections: None,
            };

            let response = self.transport.pull(&request)?;

            if !response.ops.is_empty() {
                self.applier.apply_remote_operations(&response.ops)?;
                total_pulled += response.ops.len() as u64;
            }

            self.applier.set_server_cursor(response.next_cursor)?;

            if !response.has_more {
                break;
            }
        }

        Ok(total_pulled)
    }

    /// Pushes all pending local changes to the server.
    fn push_all(&self) -> SyncResult<(u64, Vec<Conflict>)> {
        let mut total_pushed = 0u64;
        let mut all_conflicts = Vec::new();

        loop {
            self.check_cancelled()?;

            let ops = self.applier.get_pending_operations(self.config.push_batch_size)?;
            if ops.is_empty() {
                break;
            }

            let request = PushRequest {
                db_id: self.config.db_id.clone(),
                device_id: self.config.device_id.clone(),
                ops: ops.clone(),
            };

            let response = self.transport.push(&request)?;

            if response.acknowledged_up_to_op_id > 0 {
                self.applier.acknowledge_operations(response.acknowledged_up_to_op_id)?;
            }
            total_pushed += ops
                .iter()
                .filter(|op| op.op_id <= response.acknowledged_up_to_op_id)
                .count() as u64;

            let batch_conflicts = response.conflicts.len();
            all_conflicts.extend(response.conflicts);

            if batch_conflicts == 0 && ops.len() < self.config.push_batch_size as usize {
                break;
            }
            if batch_conflicts > 0 {
                // Conflicting ops are handled by `resolve_conflicts` after the
                // loop; don't spin trying to re-push them here.
                break;
            }
        }

        Ok((total_pushed, all_conflicts))
    }

    /// Runs each conflict through the configured resolver and applies it.
    fn resolve_conflicts(&self, conflicts: Vec<Conflict>, result: &mut SyncCycleResult) -> SyncResult<()> {
        let resolver = self.conflict_resolver.read();
        for conflict in conflicts {
            let resolution = resolver(&conflict);
            self.applier.resolve_conflict(&conflict, resolution)?;
            result.conflicts.push(conflict);
        }
        Ok(())
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}

/// An in-memory sync applier for testing.
pub struct MemorySyncApplier {
    pending: RwLock<Vec<Operation>>,
    applied: RwLock<Vec<ServerOperation>>,
    server_cursor: AtomicU64,
    resolved: RwLock<Vec<(Conflict, Option<Operation>)>>,
}

impl MemorySyncApplier {
    /// Creates a new memory sync applier.
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(Vec::new()),
            applied: RwLock::new(Vec::new()),
            server_cursor: AtomicU64::new(0),
            resolved: RwLock::new(Vec::new()),
        }
    }

    /// Adds a pending operation.
    pub fn add_pending(&self, operation: Operation) {
        self.pending.write().push(operation);
    }

    /// Gets all applied operations.
    pub fn applied_operations(&self) -> Vec<ServerOperation> {
        self.applied.read().clone()
    }

    /// Gets all resolved conflicts, paired with their resolution.
    pub fn resolved_conflicts(&self) -> Vec<(Conflict, Option<Operation>)> {
        self.resolved.read().clone()
    }
}

impl Default for MemorySyncApplier {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncApplier for MemorySyncApplier {
    fn apply_remote_operations(&self, operations: &[ServerOperation]) -> SyncResult<()> {
        self.applied.write().extend(operations.iter().cloned());
        Ok(())
    }

    fn get_pending_operations(&self, limit: u32) -> SyncResult<Vec<Operation>> {
        Ok(self
            .pending
            .read()
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    fn acknowledge_operations(&self, up_to_op_id: u64) -> SyncResult<()> {
        self.pending.write().retain(|op| op.op_id > up_to_op_id);
        Ok(())
    }

    fn get_server_cursor(&self) -> SyncResult<u64> {
        Ok(self.server_cursor.load(Ordering::SeqCst))
    }

    fn set_server_cursor(&self, cursor: u64) -> SyncResult<()> {
        self.server_cursor.store(cursor, Ordering::SeqCst);
        Ok(())
    }

    fn resolve_conflict(&self, conflict: &Conflict, resolution: Option<Operation>) -> SyncResult<()> {
        self.pending.write().retain(|op| op.op_id != conflict.client_op.op_id);
        if let Some(retry_op) = &resolution {
            self.pending.write().push(retry_op.clone());
        }
        self.resolved.write().push((conflict.clone(), resolution));
        Ok(())
    }
}
