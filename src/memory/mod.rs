//! Memory manager: tasklet ownership, descriptor pooling, deferred cleanup.
//!
//! This module owns every live tasklet handle and the reusable descriptor
//! pool, and runs the background cleanup task:
//!
//! - Tasklets are registered by id at submission and reaped after being
//!   marked for cleanup, once their state is terminal
//! - Descriptors are pooled up to a soft cap to avoid allocation churn
//! - Under memory pressure the cleanup interval shortens; above the critical
//!   threshold submissions are refused with `MemoryPressure`

pub mod pool;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::TaskletError;
use crate::job::{JobDescriptor, JobId};
use crate::system::SystemMonitor;
use crate::tasklet::Tasklet;

pub use pool::{DescriptorPool, PoolCounters, DEFAULT_MAX_POOL_SIZE};

/// Bounds on the cleanup interval, in milliseconds.
const MIN_CLEANUP_INTERVAL_MS: u64 = 100;
const MAX_CLEANUP_INTERVAL_MS: u64 = 60_000;

/// Default warning threshold: cleanup interval halves above this.
const DEFAULT_WARNING_PERCENT: u64 = 75;
/// Default critical threshold: allocation refused above this.
const DEFAULT_CRITICAL_PERCENT: u64 = 90;

/// Configuration for the memory manager.
#[derive(Debug, Clone)]
pub struct MemoryManagerConfig {
    /// Descriptors pre-warmed into the pool.
    pub pool_initial_size: usize,
    /// Soft cap on pooled descriptors.
    pub max_pool_size: usize,
    /// Cleanup cadence in milliseconds.
    pub cleanup_interval_ms: u64,
    /// Memory usage percent above which cleanup runs more often.
    pub warning_threshold_percent: u64,
    /// Memory usage percent above which allocation is refused.
    pub critical_threshold_percent: u64,
}

impl Default for MemoryManagerConfig {
    fn default() -> Self {
        Self {
            pool_initial_size: 32,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            cleanup_interval_ms: 5_000,
            warning_threshold_percent: DEFAULT_WARNING_PERCENT,
            critical_threshold_percent: DEFAULT_CRITICAL_PERCENT,
        }
    }
}

/// Snapshot of memory-manager state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Tasklets currently registered.
    pub active_tasklets: usize,
    /// Tasklets awaiting the next cleanup pass.
    pub pending_cleanup: usize,
    /// Tasklets registered over the manager's lifetime.
    pub total_registered: u64,
    /// Cleanup passes run so far.
    pub cleanup_operations_count: u64,
    /// Descriptor pool counters.
    pub pool: PoolCounters,
    /// System memory usage percent at snapshot time.
    pub system_memory_percent: f64,
    /// Resident memory of this process in bytes, if resolvable.
    pub process_memory_bytes: Option<u64>,
    /// Current warning threshold percent.
    pub warning_threshold_percent: u64,
    /// Current critical threshold percent.
    pub critical_threshold_percent: u64,
    /// Whether allocation is currently refused.
    pub under_pressure: bool,
}

/// Owns live tasklets and pooled descriptors; drives deferred cleanup.
pub struct MemoryManager {
    descriptors: DescriptorPool,
    tasklets: RwLock<HashMap<JobId, Arc<Tasklet>>>,
    pending_cleanup: Mutex<Vec<JobId>>,
    cleanup_interval_ms: AtomicU64,
    warning_percent: AtomicU64,
    critical_percent: AtomicU64,
    total_registered: AtomicU64,
    cleanup_operations: AtomicU64,
    monitor: Arc<SystemMonitor>,
    cleanup_gate: Mutex<bool>,
    cleanup_wake: Condvar,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryManager {
    /// Creates a manager. The cleanup task is started separately with
    /// `start_cleanup_task`.
    pub fn new(config: MemoryManagerConfig, monitor: Arc<SystemMonitor>) -> Self {
        Self {
            descriptors: DescriptorPool::new(config.pool_initial_size, config.max_pool_size),
            tasklets: RwLock::new(HashMap::new()),
            pending_cleanup: Mutex::new(Vec::new()),
            cleanup_interval_ms: AtomicU64::new(
                config
                    .cleanup_interval_ms
                    .clamp(MIN_CLEANUP_INTERVAL_MS, MAX_CLEANUP_INTERVAL_MS),
            ),
            warning_percent: AtomicU64::new(config.warning_threshold_percent),
            critical_percent: AtomicU64::new(config.critical_threshold_percent),
            total_registered: AtomicU64::new(0),
            cleanup_operations: AtomicU64::new(0),
            monitor,
            cleanup_gate: Mutex::new(false),
            cleanup_wake: Condvar::new(),
            cleanup_handle: Mutex::new(None),
        }
    }

    /// Spawns the background cleanup thread.
    ///
    /// The thread holds only a weak reference, so dropping the last strong
    /// handle also retires the thread on its next wakeup.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let weak: Weak<MemoryManager> = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("tasklets-cleanup".to_string())
            .spawn(move || loop {
                let manager = match weak.upgrade() {
                    Some(m) => m,
                    None => break,
                };

                let interval = manager.effective_cleanup_interval();
                let stopped = {
                    let mut gate = manager.cleanup_gate.lock();
                    if !*gate {
                        manager.cleanup_wake.wait_for(&mut gate, interval);
                    }
                    *gate
                };
                if stopped {
                    break;
                }

                let reaped = manager.cleanup_pass();
                if reaped > 0 {
                    debug!(reaped = reaped, "Cleanup pass reaped tasklets");
                }
                // The Arc is dropped here so a shutdown between passes can
                // release the manager.
                drop(manager);
            })
            .expect("failed to spawn cleanup thread");

        *self.cleanup_handle.lock() = Some(handle);
        info!(
            interval_ms = self.cleanup_interval_ms.load(Ordering::SeqCst),
            "Cleanup task started"
        );
    }

    /// Stops the cleanup thread and waits for it to exit.
    pub fn stop_cleanup_task(&self) {
        {
            let mut gate = self.cleanup_gate.lock();
            *gate = true;
        }
        self.cleanup_wake.notify_all();
        if let Some(handle) = self.cleanup_handle.lock().take() {
            if handle.join().is_err() {
                warn!("Cleanup thread panicked during shutdown");
            }
        }
    }

    /// Returns a reset descriptor, or `MemoryPressure` above the critical
    /// threshold.
    pub fn acquire_descriptor(&self) -> Result<JobDescriptor, TaskletError> {
        let usage = self.monitor.memory_percent();
        let critical = self.critical_percent.load(Ordering::SeqCst) as f64;
        if usage > critical {
            warn!(
                usage_percent = usage,
                critical_percent = critical,
                "Refusing allocation under memory pressure"
            );
            return Err(TaskletError::MemoryPressure {
                usage_percent: usage,
                critical_percent: critical,
            });
        }
        Ok(self.descriptors.acquire())
    }

    /// Returns a descriptor to the pool (or drops it at the cap).
    pub fn release_descriptor(&self, descriptor: JobDescriptor) {
        self.descriptors.release(descriptor);
    }

    /// Returns whether submissions are currently allowed.
    pub fn can_allocate(&self) -> bool {
        self.monitor.memory_percent() <= self.critical_percent.load(Ordering::SeqCst) as f64
    }

    /// Registers a tasklet under its id. Duplicate ids are a programmer
    /// error and surface as `Internal`.
    pub fn register_tasklet(&self, tasklet: Arc<Tasklet>) -> Result<(), TaskletError> {
        let id = tasklet.id();
        let mut map = self.tasklets.write();
        if map.contains_key(&id) {
            return Err(TaskletError::Internal(format!(
                "tasklet {id} is already registered"
            )));
        }
        map.insert(id, tasklet);
        drop(map);
        self.total_registered.fetch_add(1, Ordering::SeqCst);
        trace!(job_id = id, "Registered tasklet");
        Ok(())
    }

    /// Looks up a live tasklet by id.
    pub fn lookup(&self, id: JobId) -> Option<Arc<Tasklet>> {
        self.tasklets.read().get(&id).cloned()
    }

    /// Removes a tasklet from the registry.
    pub fn unregister_tasklet(&self, id: JobId) -> Result<(), TaskletError> {
        let removed = self.tasklets.write().remove(&id);
        match removed {
            Some(_) => {
                trace!(job_id = id, "Unregistered tasklet");
                Ok(())
            }
            None => Err(TaskletError::UnknownId(id)),
        }
    }

    /// Queues a tasklet for the next cleanup pass. It remains reachable via
    /// `lookup` until the pass reaps it.
    pub fn mark_for_cleanup(&self, id: JobId) -> Result<(), TaskletError> {
        if !self.tasklets.read().contains_key(&id) {
            return Err(TaskletError::UnknownId(id));
        }
        let mut pending = self.pending_cleanup.lock();
        if !pending.contains(&id) {
            pending.push(id);
        }
        Ok(())
    }

    /// Synchronously reaps all pending-cleanup tasklets whose state is
    /// terminal. Returns the number reaped.
    pub fn force_cleanup(&self) -> usize {
        self.cleanup_pass()
    }

    fn cleanup_pass(&self) -> usize {
        self.monitor.refresh();
        let candidates: Vec<JobId> = std::mem::take(&mut *self.pending_cleanup.lock());
        if candidates.is_empty() {
            self.cleanup_operations.fetch_add(1, Ordering::SeqCst);
            return 0;
        }

        let mut reaped = 0;
        let mut still_pending = Vec::new();
        {
            let mut map = self.tasklets.write();
            for id in candidates {
                match map.get(&id) {
                    Some(tasklet) if tasklet.is_finished() => {
                        map.remove(&id);
                        reaped += 1;
                    }
                    Some(_) => still_pending.push(id),
                    // Already unregistered; dropping the entry is idempotent.
                    None => {}
                }
            }
        }

        if !still_pending.is_empty() {
            let mut pending = self.pending_cleanup.lock();
            for id in still_pending {
                if !pending.contains(&id) {
                    pending.push(id);
                }
            }
        }

        self.cleanup_operations.fetch_add(1, Ordering::SeqCst);
        reaped
    }

    /// Clears the descriptor free list.
    pub fn reset_pool(&self) {
        self.descriptors.clear();
    }

    /// Sets the cleanup cadence, clamped to [100 ms, 60 s].
    pub fn set_cleanup_interval_ms(&self, interval_ms: u64) {
        let clamped = interval_ms.clamp(MIN_CLEANUP_INTERVAL_MS, MAX_CLEANUP_INTERVAL_MS);
        self.cleanup_interval_ms.store(clamped, Ordering::SeqCst);
        self.cleanup_wake.notify_all();
    }

    /// Adjusts the pressure thresholds (percent).
    pub fn set_thresholds(&self, warning_percent: u64, critical_percent: u64) {
        self.warning_percent
            .store(warning_percent.min(99), Ordering::SeqCst);
        self.critical_percent
            .store(critical_percent.clamp(1, 99), Ordering::SeqCst);
    }

    /// Adjusts the descriptor pool soft cap.
    pub fn set_max_pool_size(&self, max_size: usize) {
        self.descriptors.set_max_size(max_size);
    }

    /// The interval until the next cleanup pass, shortened under pressure.
    fn effective_cleanup_interval(&self) -> Duration {
        let base = self.cleanup_interval_ms.load(Ordering::SeqCst);
        let usage = self.monitor.memory_percent();
        let warning = self.warning_percent.load(Ordering::SeqCst) as f64;
        let critical = self.critical_percent.load(Ordering::SeqCst) as f64;

        let millis = if usage > critical {
            MIN_CLEANUP_INTERVAL_MS
        } else if usage > warning {
            (base / 2).max(MIN_CLEANUP_INTERVAL_MS)
        } else {
            base
        };
        Duration::from_millis(millis)
    }

    /// Returns a full snapshot of manager state.
    pub fn stats(&self) -> MemoryStats {
        let usage = self.monitor.memory_percent();
        let critical = self.critical_percent.load(Ordering::SeqCst);
        MemoryStats {
            active_tasklets: self.tasklets.read().len(),
            pending_cleanup: self.pending_cleanup.lock().len(),
            total_registered: self.total_registered.load(Ordering::SeqCst),
            cleanup_operations_count: self.cleanup_operations.load(Ordering::SeqCst),
            pool: self.descriptors.counters(),
            system_memory_percent: usage,
            process_memory_bytes: self.monitor.process_memory_bytes(),
            warning_threshold_percent: self.warning_percent.load(Ordering::SeqCst),
            critical_threshold_percent: critical,
            under_pressure: usage > critical as f64,
        }
    }
}

impl Drop for MemoryManager {
    fn drop(&mut self) {
        // The cleanup thread only holds a weak reference; signal it anyway
        // so shutdown does not wait out a full interval.
        let mut gate = self.cleanup_gate.lock();
        *gate = true;
        drop(gate);
        self.cleanup_wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<MemoryManager> {
        Arc::new(MemoryManager::new(
            MemoryManagerConfig::default(),
            Arc::new(SystemMonitor::new()),
        ))
    }

    #[test]
    fn test_register_lookup_unregister_roundtrip() {
        let m = manager();
        let before = m.stats().active_tasklets;

        let t = Arc::new(Tasklet::new(10));
        m.register_tasklet(Arc::clone(&t)).expect("register");
        assert!(m.lookup(10).is_some());

        m.unregister_tasklet(10).expect("unregister");
        assert!(m.lookup(10).is_none());
        assert_eq!(m.stats().active_tasklets, before);
    }

    #[test]
    fn test_duplicate_register_is_error() {
        let m = manager();
        let t = Arc::new(Tasklet::new(11));
        m.register_tasklet(Arc::clone(&t)).expect("first register");
        let err = m.register_tasklet(t).unwrap_err();
        assert!(matches!(err, TaskletError::Internal(_)));
    }

    #[test]
    fn test_unknown_id_operations_error() {
        let m = manager();
        assert_eq!(
            m.unregister_tasklet(999),
            Err(TaskletError::UnknownId(999))
        );
        assert_eq!(m.mark_for_cleanup(999), Err(TaskletError::UnknownId(999)));
    }

    #[test]
    fn test_cleanup_reaps_only_terminal() {
        let m = manager();
        let finished = Arc::new(Tasklet::new(20));
        finished.cancel();
        let running = Arc::new(Tasklet::new(21));
        running.mark_running();

        m.register_tasklet(Arc::clone(&finished)).expect("register");
        m.register_tasklet(Arc::clone(&running)).expect("register");
        m.mark_for_cleanup(20).expect("mark");
        m.mark_for_cleanup(21).expect("mark");

        assert_eq!(m.force_cleanup(), 1);
        assert!(m.lookup(20).is_none());
        assert!(m.lookup(21).is_some());

        // The unfinished tasklet stays queued and is reaped once terminal.
        running.complete(crate::job::Outcome::Success(Vec::new()));
        assert_eq!(m.force_cleanup(), 1);
        assert!(m.lookup(21).is_none());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let m = manager();
        let t = Arc::new(Tasklet::new(30));
        t.cancel();
        m.register_tasklet(t).expect("register");
        m.mark_for_cleanup(30).expect("mark");
        m.mark_for_cleanup(30).expect("second mark is a no-op");

        assert_eq!(m.force_cleanup(), 1);
        assert_eq!(m.force_cleanup(), 0);
    }

    #[test]
    fn test_descriptor_roundtrip_accounting() {
        let m = manager();
        let d = m.acquire_descriptor().expect("acquire");
        let counters = m.stats().pool;
        assert_eq!(counters.in_use, 1);
        m.release_descriptor(d);
        let counters = m.stats().pool;
        assert_eq!(counters.in_use, 0);
        assert_eq!(
            counters.in_use + counters.available_in_pool as u64 + counters.dropped,
            counters.total_created
        );
    }

    #[test]
    fn test_stats_counts_operations() {
        let m = manager();
        let before = m.stats().cleanup_operations_count;
        m.force_cleanup();
        m.force_cleanup();
        assert_eq!(m.stats().cleanup_operations_count, before + 2);
    }

    #[test]
    fn test_cleanup_task_lifecycle() {
        let m = manager();
        m.set_cleanup_interval_ms(100);
        m.start_cleanup_task();

        let t = Arc::new(Tasklet::new(40));
        t.cancel();
        m.register_tasklet(t).expect("register");
        m.mark_for_cleanup(40).expect("mark");

        // The background pass should reap it within a few intervals.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while m.lookup(40).is_some() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(m.lookup(40).is_none());

        m.stop_cleanup_task();
    }

    #[test]
    fn test_interval_clamping() {
        let m = manager();
        m.set_cleanup_interval_ms(1);
        assert_eq!(m.stats().cleanup_operations_count, 0);
        // Clamped to the floor rather than rejected.
        m.set_cleanup_interval_ms(10_000_000);
        let interval = m.effective_cleanup_interval();
        assert!(interval <= Duration::from_millis(MAX_CLEANUP_INTERVAL_MS));
    }
}
