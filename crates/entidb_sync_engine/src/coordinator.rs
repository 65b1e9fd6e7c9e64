//! Auto-Sync Coordinator (C9): wraps the sync engine (C4) in a managed
//! background lifetime, driving sync cycles from debounced local-change
//! notifications, a periodic timer, an optional startup sync, and
//! explicit `sync_now` calls.
//!
//! Deliberately holds no reference to [`crate::wal_observer::WalObserver`]
//! or the offline queue (C3) directly — only an `Arc<SyncEngine<_, _>>` —
//! so the coordinator and the engine never need to know about each other's
//! concrete types. Whatever runs the WAL observer's poll loop calls
//! [`Coordinator::notify_local_change`] when it finds something to push;
//! the coordinator doesn't poll the WAL itself.

use crate::state::{SyncApplier, SyncCycleResult, SyncEngine};
use crate::transport::SyncTransport;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Configuration for the auto-sync coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long to wait after a local-change notification before syncing,
    /// so a burst of local writes collapses into one cycle.
    pub debounce_delay: Duration,
    /// How often to sync even without local changes. `None` disables it.
    pub periodic_interval: Option<Duration>,
    /// Whether to run a sync cycle as soon as the coordinator starts.
    pub startup_sync: bool,
    /// Whether a failed cycle is retried automatically.
    pub auto_retry: bool,
    /// Fixed delay between coordinator-level retry attempts.
    pub retry_delay: Duration,
    /// Maximum coordinator-level retry attempts before latching `Error`.
    pub max_retry_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_delay: Duration::from_millis(500),
            periodic_interval: Some(Duration::from_secs(5 * 60)),
            startup_sync: true,
            auto_retry: true,
            retry_delay: Duration::from_secs(5),
            max_retry_attempts: 3,
        }
    }
}

/// Lifecycle state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// The background loop is not running.
    Stopped,
    /// Running and idle between cycles.
    Running,
    /// A sync cycle is currently in flight.
    Syncing,
    /// Trigger processing is suspended; `resume` restarts it.
    Paused,
    /// Retries are exhausted; only an explicit `sync_now` clears this.
    Error,
}

/// Aggregated, cumulative coordinator statistics.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorStats {
    /// Number of sync cycles that completed successfully.
    pub cycles_succeeded: u64,
    /// Number of sync cycles that failed (before any coordinator-level retry).
    pub cycles_failed: u64,
    /// Number of coordinator-level retries performed.
    pub retries_performed: u64,
    /// Result of the most recently completed cycle, successful or not.
    pub last_result: Option<SyncCycleResult>,
}

#[derive(Default)]
struct TriggerFlags {
    local_change: bool,
    explicit: bool,
}

struct Shared {
    state: Mutex<CoordinatorState>,
    stats: Mutex<CoordinatorStats>,
    trigger_flags: Mutex<TriggerFlags>,
    trigger_cv: Condvar,
    shutdown: AtomicBool,
    retry_attempts: AtomicU32,
}

/// Wraps a [`SyncEngine`] with a managed background lifetime per the
/// Auto-Sync Coordinator (C9).
pub struct Coordinator<T: SyncTransport + 'static, A: SyncApplier + 'static> {
    engine: Arc<SyncEngine<T, A>>,
    config: CoordinatorConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncTransport + 'static, A: SyncApplier + 'static> Coordinator<T, A> {
    /// Creates a coordinator over `engine`, not yet started.
    pub fn new(engine: Arc<SyncEngine<T, A>>, config: CoordinatorConfig) -> Self {
        Self {
            engine,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(CoordinatorState::Stopped),
                stats: Mutex::new(CoordinatorStats::default()),
                trigger_flags: Mutex::new(TriggerFlags::default()),
                trigger_cv: Condvar::new(),
                shutdown: AtomicBool::new(false),
                retry_attempts: AtomicU32::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        *self.shared.state.lock().unwrap()
    }

    /// Snapshot of cumulative coordinator statistics.
    pub fn stats(&self) -> CoordinatorStats {
        self.shared.stats.lock().unwrap().clone()
    }

    /// Starts the background loop. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        self.shared.shutdown.store(false, Ordering::SeqCst);
        *self.shared.state.lock().unwrap() = CoordinatorState::Running;

        let this = Arc::clone(self);
        *handle = Some(std::thread::spawn(move || this.run_loop()));
    }

    /// Stops the background loop and waits for it to exit.
    pub fn stop(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.trigger_cv.notify_all();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        *self.shared.state.lock().unwrap() = CoordinatorState::Stopped;
    }

    /// Suspends trigger processing; a running cycle finishes normally.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if *state != CoordinatorState::Stopped {
            *state = CoordinatorState::Paused;
        }
    }

    /// Resumes trigger processing after [`Self::pause`].
    pub fn resume(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if *state == CoordinatorState::Paused {
            *state = CoordinatorState::Running;
        }
        drop(state);
        self.shared.trigger_cv.notify_all();
    }

    /// Notifies the coordinator of a local change observed via C2.
    ///
    /// Debounced: a burst of calls within `debounce_delay` triggers at
    /// most one cycle.
    pub fn notify_local_change(&self) {
        let mut flags = self.shared.trigger_flags.lock().unwrap();
        flags.local_change = true;
        drop(flags);
        self.shared.trigger_cv.notify_all();
    }

    /// Forces an immediate sync cycle, clearing a latched `Error` state.
    pub fn sync_now(&self) {
        self.shared.retry_attempts.store(0, Ordering::SeqCst);
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state == CoordinatorState::Error {
                *state = CoordinatorState::Running;
            }
        }
        let mut flags = self.shared.trigger_flags.lock().unwrap();
        flags.explicit = true;
        drop(flags);
        self.shared.trigger_cv.notify_all();
    }

    fn run_loop(&self) {
        if self.config.startup_sync {
            self.run_cycle();
        }

        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                return;
            }

            let wait_for = match self.state() {
                CoordinatorState::Error => Duration::from_secs(u32::MAX as u64),
                _ => self.config.periodic_interval.unwrap_or(Duration::from_secs(u32::MAX as u64)),
            };

            let flags = self.shared.trigger_flags.lock().unwrap();
            let (flags, timeout) = self.shared.trigger_cv.wait_timeout(flags, wait_for).unwrap();
            drop(flags);

            if self.shared.shutdown.load(Ordering::SeqCst) {
                return;
            }
            if self.state() == CoordinatorState::Paused {
                continue;
            }

            let (local_change, explicit) = {
                let mut flags = self.shared.trigger_flags.lock().unwrap();
                let snapshot = (flags.local_change, flags.explicit);
                flags.local_change = false;
                flags.explicit = false;
                snapshot
            };

            if self.state() == CoordinatorState::Error && !explicit {
                // Latched: only an explicit sync_now clears Error.
                continue;
            }

            let periodic_fire = timeout.timed_out() && self.config.periodic_interval.is_some();
            if !local_change && !explicit && !periodic_fire {
                continue;
            }

            if local_change && !explicit {
                std::thread::sleep(self.config.debounce_delay);
                // Coalesce anything that arrived during the debounce window.
                self.shared.trigger_flags.lock().unwrap().local_change = false;
            }

            self.run_cycle();
        }
    }

    fn run_cycle(&self) {
        *self.shared.state.lock().unwrap() = CoordinatorState::Syncing;

        let mut outcome = self.engine.sync_with_retry();
        while let Err(e) = &outcome {
            if !self.config.auto_retry || !e.is_retryable() {
                break;
            }
            let attempt = self.shared.retry_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.max_retry_attempts {
                break;
            }
            self.shared.stats.lock().unwrap().retries_performed += 1;
            std::thread::sleep(self.config.retry_delay);
            outcome = self.engine.sync_with_retry();
        }

        let mut stats = self.shared.stats.lock().unwrap();
        match outcome {
            Ok(result) => {
                self.shared.retry_attempts.store(0, Ordering::SeqCst);
                stats.cycles_succeeded += 1;
                stats.last_result = Some(result);
                drop(stats);
                let mut state = self.shared.state.lock().unwrap();
                if *state != CoordinatorState::Paused {
                    *state = CoordinatorState::Running;
                }
            }
            Err(_) => {
                stats.cycles_failed += 1;
                drop(stats);
                *self.shared.state.lock().unwrap() = CoordinatorState::Error;
            }
        }
    }
}

impl<T: SyncTransport + 'static, A: SyncApplier + 'static> Drop for Coordinator<T, A> {
    fn drop(&mut self) {
        self.stop();
    }
}
