//! Thread pool: priority dispatch onto OS worker threads.
//!
//! This module provides the job lifecycle engine:
//!
//! - **JobQueue**: bounded priority queue shared by all workers
//! - **Worker**: dequeue loop with deadline and cancellation checks
//! - **ThreadPool**: submission, joins, resize, stats, two-phase shutdown
//!
//! # Architecture
//!
//! ```text
//!   submit ──> ┌───────────────┐        ┌──────────┐
//!              │  JobQueue     │──pop──>│ Worker 1 │──┐
//!              │  (priority,   │        ├──────────┤  │   completion
//!              │   bounded)    │──pop──>│ Worker N │──┼──> host loop +
//!              └───────────────┘        └──────────┘  │    observers
//!                                                     │
//!                        join(id) <── Tasklet latch <─┘
//! ```

pub mod queue;
mod worker;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TaskletError;
use crate::host::{HostEvent, HostSignal};
use crate::job::{JobDescriptor, JobId, JobOptions, JobState, Outcome, Work};
use crate::memory::MemoryManager;
use crate::metrics::MetricsCollector;
use crate::utils::clock::monotonic_nanos;

pub use queue::{JobQueue, DEFAULT_QUEUE_CAPACITY};

use queue::QueuedJob;
use worker::{Worker, WorkerSlot};

/// How long a worker waits on the queue before re-checking its stop flag.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the shutdown drain re-checks for quiescence.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the thread pool.
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads to start with.
    pub workers: usize,
    /// Capacity of the shared work queue.
    pub queue_capacity: usize,
    /// Default per-job timeout in milliseconds (0 = none), used when a
    /// submission does not override it.
    pub default_timeout_ms: u64,
    /// How long a worker may sit idle before retiring (0 = never). Retired
    /// workers respawn lazily on the next submission.
    pub idle_timeout_ms: u64,
    /// Idle retirement never shrinks the pool below this.
    pub min_workers: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            default_timeout_ms: 0,
            idle_timeout_ms: 0,
            min_workers: 1,
        }
    }
}

impl ThreadPoolConfig {
    /// Creates a configuration with the specified number of workers.
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Sets the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the default per-job timeout in milliseconds (0 = none).
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }
}

/// Snapshot of pool state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Live worker threads.
    pub worker_threads: usize,
    /// Jobs currently executing.
    pub active_jobs: usize,
    /// Jobs waiting in the queue.
    pub pending_jobs: usize,
    /// Jobs accepted over the pool's lifetime.
    pub total_submitted: u64,
    /// Jobs that completed successfully.
    pub completed_jobs: u64,
    /// Jobs that failed (user error, timeout, shutdown drain).
    pub failed_jobs: u64,
    /// Jobs cancelled while pending.
    pub cancelled_jobs: u64,
    /// Mean execution time over finished jobs, in milliseconds.
    pub avg_execution_ms: f64,
    /// Mean queue wait over finished jobs, in milliseconds.
    pub avg_queue_wait_ms: f64,
}

impl PoolStats {
    /// Total jobs that reached a terminal state.
    pub fn total_finished(&self) -> u64 {
        self.completed_jobs + self.failed_jobs + self.cancelled_jobs
    }

    /// Success rate over finished jobs, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let finished = self.total_finished();
        if finished == 0 {
            return 100.0;
        }
        self.completed_jobs as f64 / finished as f64 * 100.0
    }
}

/// Shared atomic counters behind `PoolStats`.
pub(crate) struct SharedPoolStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    active: AtomicUsize,
    total_execution_micros: AtomicU64,
    total_queue_wait_micros: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            total_execution_micros: AtomicU64::new(0),
            total_queue_wait_micros: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_completion(&self, execution_ms: f64, queue_wait_ms: f64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.record_durations(execution_ms, queue_wait_ms);
    }

    pub(crate) fn record_failure(&self, execution_ms: f64, queue_wait_ms: f64) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.record_durations(execution_ms, queue_wait_ms);
    }

    fn record_durations(&self, execution_ms: f64, queue_wait_ms: f64) {
        self.total_execution_micros
            .fetch_add((execution_ms * 1_000.0) as u64, Ordering::SeqCst);
        self.total_queue_wait_micros
            .fetch_add((queue_wait_ms * 1_000.0) as u64, Ordering::SeqCst);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn inc_active(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn dec_active(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn to_stats(&self, worker_threads: usize, pending_jobs: usize) -> PoolStats {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let executed = completed + failed;

        let (avg_execution_ms, avg_queue_wait_ms) = if executed > 0 {
            (
                self.total_execution_micros.load(Ordering::SeqCst) as f64
                    / executed as f64
                    / 1_000.0,
                self.total_queue_wait_micros.load(Ordering::SeqCst) as f64
                    / executed as f64
                    / 1_000.0,
            )
        } else {
            (0.0, 0.0)
        };

        PoolStats {
            worker_threads,
            active_jobs: self.active(),
            pending_jobs,
            total_submitted: self.submitted.load(Ordering::SeqCst),
            completed_jobs: completed,
            failed_jobs: failed,
            cancelled_jobs: self.cancelled.load(Ordering::SeqCst),
            avg_execution_ms,
            avg_queue_wait_ms,
        }
    }
}

/// Per-job figures reported to observers after every terminal transition.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    /// The finished job.
    pub id: JobId,
    /// Its terminal state.
    pub state: JobState,
    /// Its scheduling priority.
    pub priority: i32,
    /// Time spent queued, in milliseconds.
    pub queue_wait_ms: f64,
    /// Time spent executing, in milliseconds (0 for jobs that never ran).
    pub execution_ms: f64,
}

impl JobCompletion {
    pub(crate) fn from_descriptor(descriptor: &JobDescriptor) -> Self {
        Self {
            id: descriptor.id(),
            state: descriptor.state(),
            priority: descriptor.priority(),
            queue_wait_ms: descriptor.queue_wait_ms(),
            execution_ms: descriptor.execution_ms(),
        }
    }

    /// Returns whether the job completed successfully.
    pub fn is_success(&self) -> bool {
        self.state == JobState::Completed
    }
}

/// Listener notified after every terminal transition.
pub trait JobObserver: Send + Sync {
    /// Called by the finishing worker (or the shutdown drain) once per job.
    fn on_job_complete(&self, completion: &JobCompletion);
}

/// Dispatches jobs onto a bounded set of OS worker threads.
pub struct ThreadPool {
    queue: Arc<JobQueue>,
    memory: Arc<MemoryManager>,
    signal: Arc<dyn HostSignal>,
    observers: Arc<RwLock<Vec<Arc<dyn JobObserver>>>>,
    stats: Arc<SharedPoolStats>,
    live_workers: Arc<AtomicUsize>,
    accepting: AtomicBool,
    workers: Arc<Mutex<Vec<WorkerSlot>>>,
    next_worker_index: Arc<AtomicUsize>,
    target_workers: AtomicUsize,
    default_timeout_ms: u64,
    idle_timeout: Duration,
    min_workers: usize,
    shutdown_done: Mutex<bool>,
    collector: MetricsCollector,
}

impl ThreadPool {
    /// Creates a pool and starts its workers.
    pub fn new(
        config: ThreadPoolConfig,
        memory: Arc<MemoryManager>,
        signal: Arc<dyn HostSignal>,
    ) -> Self {
        let workers = config.workers.max(1);
        let pool = Self {
            queue: Arc::new(JobQueue::new(config.queue_capacity)),
            memory,
            signal,
            observers: Arc::new(RwLock::new(Vec::new())),
            stats: Arc::new(SharedPoolStats::new()),
            live_workers: Arc::new(AtomicUsize::new(0)),
            accepting: AtomicBool::new(true),
            workers: Arc::new(Mutex::new(Vec::new())),
            next_worker_index: Arc::new(AtomicUsize::new(0)),
            target_workers: AtomicUsize::new(workers),
            default_timeout_ms: config.default_timeout_ms,
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            min_workers: config.min_workers.max(1),
            shutdown_done: Mutex::new(false),
            collector: MetricsCollector::new(),
        };

        {
            let mut slots = pool.workers.lock();
            for _ in 0..workers {
                let slot = pool.spawn_worker();
                slots.push(slot);
            }
        }
        info!(workers = workers, "Thread pool started");
        pool
    }

    /// Registers a completion observer.
    pub fn add_observer(&self, observer: Arc<dyn JobObserver>) {
        self.observers.write().push(observer);
    }

    /// Enrolls a new job and returns its id immediately.
    ///
    /// The work never runs synchronously inside this call. Fails with
    /// `PoolShutdown` once shutdown has begun and with `MemoryPressure`
    /// when the memory manager refuses allocation.
    pub fn submit(
        &self,
        work: Box<dyn Work>,
        options: JobOptions,
    ) -> Result<JobId, TaskletError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(TaskletError::PoolShutdown);
        }
        self.replenish_workers();

        let mut descriptor = self.memory.acquire_descriptor()?;
        let id = descriptor.id();
        let tasklet = Arc::new(crate::tasklet::Tasklet::new(id));
        if let Err(err) = self.memory.register_tasklet(Arc::clone(&tasklet)) {
            self.memory.release_descriptor(descriptor);
            return Err(err);
        }

        let timeout_ms = options.timeout_ms.unwrap_or(self.default_timeout_ms);
        descriptor.prepare(
            work,
            options.priority,
            timeout_ms,
            options.on_complete,
            monotonic_nanos(),
        );

        match self.queue.push(descriptor, tasklet) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::SeqCst);
                self.collector.record_submitted();
                self.collector.update_queue_depth(self.queue.len());
                debug!(
                    job_id = id,
                    priority = options.priority,
                    timeout_ms = timeout_ms,
                    "Job submitted"
                );
                Ok(id)
            }
            Err((descriptor, _tasklet)) => {
                let _ = self.memory.unregister_tasklet(id);
                self.memory.release_descriptor(descriptor);
                Err(TaskletError::PoolShutdown)
            }
        }
    }

    /// Blocks the calling thread until the job reaches a terminal state.
    pub fn join(&self, id: JobId) -> Result<Outcome, TaskletError> {
        let tasklet = self.memory.lookup(id).ok_or(TaskletError::UnknownId(id))?;
        Ok(tasklet.wait())
    }

    /// Non-blocking variant of `join`.
    pub fn try_result(&self, id: JobId) -> Result<Option<Outcome>, TaskletError> {
        let tasklet = self.memory.lookup(id).ok_or(TaskletError::UnknownId(id))?;
        Ok(tasklet.outcome())
    }

    /// Attempts to cancel a job; succeeds only while it is still pending.
    pub fn cancel(&self, id: JobId) -> Result<bool, TaskletError> {
        let tasklet = self.memory.lookup(id).ok_or(TaskletError::UnknownId(id))?;
        let cancelled = tasklet.cancel();
        if cancelled {
            self.stats.record_cancelled();
            debug!(job_id = id, "Job cancelled while pending");
        }
        Ok(cancelled)
    }

    /// Resizes the pool to `workers` threads (>= 1).
    ///
    /// Scaling down signals excess workers to exit after their current job;
    /// no running job is dropped.
    pub fn set_worker_count(&self, workers: usize) -> Result<(), TaskletError> {
        if workers == 0 {
            return Err(TaskletError::InvalidArgument(
                "worker count must be >= 1".to_string(),
            ));
        }

        let mut slots = self.workers.lock();

        // Reap slots whose threads have already exited.
        let mut alive = Vec::with_capacity(slots.len());
        for slot in slots.drain(..) {
            if slot.handle.is_finished() {
                let _ = slot.handle.join();
            } else {
                alive.push(slot);
            }
        }
        *slots = alive;

        let active = slots.iter().filter(|s| !s.stop.load(Ordering::SeqCst)).count();
        self.target_workers.store(workers, Ordering::SeqCst);
        if workers > active {
            for _ in 0..(workers - active) {
                let slot = self.spawn_worker();
                slots.push(slot);
            }
        } else if workers < active {
            let mut excess = active - workers;
            for slot in slots.iter().rev() {
                if excess == 0 {
                    break;
                }
                if !slot.stop.swap(true, Ordering::SeqCst) {
                    excess -= 1;
                }
            }
        }

        info!(target = workers, previous = active, "Resized thread pool");
        Ok(())
    }

    /// Respawns workers retired by the idle timeout, up to the target count.
    fn replenish_workers(&self) {
        let target = self.target_workers.load(Ordering::SeqCst);
        if self.live_workers.load(Ordering::SeqCst) >= target {
            return;
        }
        let mut slots = self.workers.lock();
        let mut alive = Vec::with_capacity(slots.len());
        for slot in slots.drain(..) {
            if slot.handle.is_finished() {
                let _ = slot.handle.join();
            } else {
                alive.push(slot);
            }
        }
        *slots = alive;
        while self.live_workers.load(Ordering::SeqCst) < target {
            let slot = self.spawn_worker();
            slots.push(slot);
        }
    }

    /// Returns a snapshot of pool state.
    pub fn stats(&self) -> PoolStats {
        self.stats
            .to_stats(self.live_workers.load(Ordering::SeqCst), self.queue.len())
    }

    /// Returns whether the pool still accepts submissions.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// The queue capacity, for health reporting.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Phase 1 of shutdown: stop accepting submissions. Idempotent.
    pub fn begin_shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            info!("Thread pool shutdown started");
        }
    }

    /// Phase 2 of shutdown: wait up to `grace` for the queue to drain and
    /// workers to idle, then fail remaining pending jobs with `PoolShutdown`
    /// and stop all workers. Idempotent; repeated calls return immediately.
    pub fn await_shutdown(&self, grace: Duration) {
        self.begin_shutdown();

        let mut done = self.shutdown_done.lock();
        if *done {
            return;
        }

        let deadline = Instant::now() + grace;
        while (!self.queue.is_empty() || self.stats.active() > 0) && Instant::now() < deadline {
            std::thread::sleep(DRAIN_POLL_INTERVAL);
        }

        self.queue.close();
        let remaining = self.queue.drain();
        if !remaining.is_empty() {
            warn!(
                remaining = remaining.len(),
                "Failing pending jobs after shutdown grace"
            );
        }
        for job in remaining {
            self.fail_drained_job(job);
        }

        let slots: Vec<WorkerSlot> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for slot in slots {
            slot.stop.store(true, Ordering::SeqCst);
            if slot.handle.join().is_err() {
                warn!(worker = slot.index, "Worker thread panicked during shutdown");
            }
        }

        // A poisoned worker may have pushed its replacement between the
        // close and the drain above; reap those too.
        let stragglers: Vec<WorkerSlot> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for slot in stragglers {
            slot.stop.store(true, Ordering::SeqCst);
            if slot.handle.join().is_err() {
                warn!(worker = slot.index, "Worker thread panicked during shutdown");
            }
        }

        *done = true;
        info!("Thread pool shutdown complete");
    }

    fn fail_drained_job(&self, job: QueuedJob) {
        let QueuedJob {
            mut descriptor,
            tasklet,
            ..
        } = job;
        let id = descriptor.id();

        let outcome = match tasklet.outcome() {
            // Cancelled while queued; keep that outcome.
            Some(existing) => {
                descriptor.mark_cancelled();
                existing
            }
            None => {
                descriptor.mark_failed(TaskletError::PoolShutdown.to_string(), monotonic_nanos());
                let outcome = Outcome::Failure(TaskletError::PoolShutdown);
                tasklet.complete(outcome.clone());
                self.stats.record_failure(0.0, descriptor.total_ms());
                outcome
            }
        };

        let completion = JobCompletion::from_descriptor(&descriptor);
        if let Some(callback) = descriptor.take_callback() {
            self.signal.wake(HostEvent::JobCompleted {
                id,
                outcome,
                callback: Some(callback),
            });
        }
        for observer in self.observers.read().iter() {
            observer.on_job_complete(&completion);
        }
        self.collector.record_outcome(completion.state, 0.0, 0.0);
        self.memory.release_descriptor(descriptor);
    }

    fn spawn_worker(&self) -> WorkerSlot {
        let worker = Worker {
            index: self.next_worker_index.fetch_add(1, Ordering::SeqCst),
            stop: Arc::new(AtomicBool::new(false)),
            queue: Arc::clone(&self.queue),
            memory: Arc::clone(&self.memory),
            signal: Arc::clone(&self.signal),
            observers: Arc::clone(&self.observers),
            stats: Arc::clone(&self.stats),
            live_workers: Arc::clone(&self.live_workers),
            slots: Arc::downgrade(&self.workers),
            next_index: Arc::clone(&self.next_worker_index),
            poll_interval: WORKER_POLL_INTERVAL,
            idle_timeout: self.idle_timeout,
            min_workers: self.min_workers,
            collector: MetricsCollector::new(),
        };
        worker.spawn()
    }
}
