//! A single worker thread processing jobs from the shared queue.
//!
//! Workers own the job state machine between dequeue and terminal state:
//! pre-dequeue checks (cancellation, elapsed deadline), execution with panic
//! capture, completion signalling, observer notification, and descriptor
//! release.
//!
//! A panic in user work is fatal for its worker: the current job fails with
//! an `Internal` error, and the poisoned thread spawns a replacement into
//! the pool's slot list before retiring.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

use crate::error::TaskletError;
use crate::host::{HostEvent, HostSignal};
use crate::job::{JobDescriptor, JobState, Outcome, WorkContext};
use crate::memory::MemoryManager;
use crate::metrics::MetricsCollector;
use crate::utils::clock::monotonic_nanos;

use super::queue::{JobQueue, Pop, QueuedJob};
use super::{JobCompletion, JobObserver, SharedPoolStats};

/// Bookkeeping handle for one worker thread, kept by the pool so shutdown
/// can signal and join it.
pub(crate) struct WorkerSlot {
    pub index: usize,
    pub stop: Arc<AtomicBool>,
    pub handle: JoinHandle<()>,
}

pub(crate) struct Worker {
    pub index: usize,
    pub stop: Arc<AtomicBool>,
    pub queue: Arc<JobQueue>,
    pub memory: Arc<MemoryManager>,
    pub signal: Arc<dyn HostSignal>,
    pub observers: Arc<RwLock<Vec<Arc<dyn JobObserver>>>>,
    pub stats: Arc<SharedPoolStats>,
    pub live_workers: Arc<AtomicUsize>,
    pub slots: Weak<Mutex<Vec<WorkerSlot>>>,
    pub next_index: Arc<AtomicUsize>,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub min_workers: usize,
    pub collector: MetricsCollector,
}

impl Worker {
    /// Spawns the worker thread and returns its slot for bookkeeping.
    pub(crate) fn spawn(self) -> WorkerSlot {
        let index = self.index;
        let stop = Arc::clone(&self.stop);
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        self.collector
            .update_workers(self.live_workers.load(Ordering::SeqCst));

        let handle = std::thread::Builder::new()
            .name(format!("tasklets-worker-{index}"))
            .spawn(move || self.run())
            .expect("failed to spawn worker thread");

        WorkerSlot {
            index,
            stop,
            handle,
        }
    }

    /// Main worker loop: dequeue and process until stopped, idle-retired,
    /// poisoned by a panic, or the queue closes.
    fn run(self) {
        debug!(worker = self.index, "Worker started");
        let mut last_job = Instant::now();
        let mut retired = false;

        loop {
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match self.queue.pop(self.poll_interval) {
                Pop::Job(job) => {
                    let poisoned = self.process(job);
                    last_job = Instant::now();
                    if poisoned {
                        self.replace_self();
                        break;
                    }
                }
                Pop::TimedOut => {
                    if self.idle_timeout > Duration::ZERO
                        && last_job.elapsed() >= self.idle_timeout
                        && self.try_retire()
                    {
                        retired = true;
                        debug!(worker = self.index, "Idle worker retiring");
                        break;
                    }
                }
                Pop::Closed => break,
            }
        }

        if !retired {
            self.live_workers.fetch_sub(1, Ordering::SeqCst);
        }
        self.collector
            .update_workers(self.live_workers.load(Ordering::SeqCst));
        debug!(worker = self.index, "Worker stopped");
    }

    /// Decrements the live count iff the pool stays at or above its floor.
    fn try_retire(&self) -> bool {
        self.live_workers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                (live > self.min_workers).then(|| live - 1)
            })
            .is_ok()
    }

    /// A fresh worker sharing this worker's pool wiring, under a new index
    /// and stop flag.
    fn replacement(&self) -> Worker {
        Worker {
            index: self.next_index.fetch_add(1, Ordering::SeqCst),
            stop: Arc::new(AtomicBool::new(false)),
            queue: Arc::clone(&self.queue),
            memory: Arc::clone(&self.memory),
            signal: Arc::clone(&self.signal),
            observers: Arc::clone(&self.observers),
            stats: Arc::clone(&self.stats),
            live_workers: Arc::clone(&self.live_workers),
            slots: self.slots.clone(),
            next_index: Arc::clone(&self.next_index),
            poll_interval: self.poll_interval,
            idle_timeout: self.idle_timeout,
            min_workers: self.min_workers,
            collector: self.collector,
        }
    }

    /// A panic poisoned this worker: spawn its replacement into the pool's
    /// slot list, then let the caller retire this thread. Skipped once the
    /// queue is closed, so shutdown does not race new spawns.
    fn replace_self(&self) {
        if self.queue.is_closed() {
            return;
        }
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        error!(
            worker = self.index,
            "Worker poisoned by job panic; spawning replacement"
        );
        let slot = self.replacement().spawn();
        slots.lock().push(slot);
    }

    /// Processes one job. Returns whether the job panicked and this worker
    /// must be replaced.
    fn process(&self, job: QueuedJob) -> bool {
        let QueuedJob {
            mut descriptor,
            tasklet,
            ..
        } = job;
        let id = descriptor.id();
        let now = monotonic_nanos();

        // Cancelled while queued: the tasklet already holds the terminal
        // outcome; the work must never execute.
        if tasklet.status() == JobState::Cancelled {
            trace!(worker = self.index, job_id = id, "Dropping cancelled job");
            descriptor.mark_cancelled();
            self.finish(descriptor, Outcome::Cancelled);
            return false;
        }

        // Deadline elapsed before dequeue: fail without executing.
        if descriptor.deadline_elapsed(now) {
            let err = TaskletError::Timeout {
                timeout_ms: descriptor.timeout_ms(),
            };
            debug!(
                worker = self.index,
                job_id = id,
                timeout_ms = descriptor.timeout_ms(),
                "Job expired before dequeue"
            );
            descriptor.mark_failed(err.to_string(), now);
            let outcome = Outcome::Failure(err);
            tasklet.complete(outcome.clone());
            self.stats.record_failure(0.0, descriptor.total_ms());
            self.finish(descriptor, outcome);
            return false;
        }

        // The cancel/dequeue race resolves here: losing the transition means
        // the job was cancelled after the state check above.
        if !tasklet.mark_running() {
            descriptor.mark_cancelled();
            self.finish(descriptor, Outcome::Cancelled);
            return false;
        }
        descriptor.mark_running(now);
        self.stats.inc_active();

        let ctx = WorkContext::new(tasklet.cancel_flag());
        let executed = match descriptor.take_work() {
            Some(mut work) => catch_unwind(AssertUnwindSafe(|| work.execute(&ctx))),
            None => Ok(Err("job submitted without work".to_string())),
        };
        let done = monotonic_nanos();
        self.stats.dec_active();

        let mut poisoned = false;
        let outcome = match executed {
            Ok(Ok(bytes)) => {
                descriptor.mark_completed(bytes.clone(), done);
                self.stats
                    .record_completion(descriptor.execution_ms(), descriptor.queue_wait_ms());
                trace!(
                    worker = self.index,
                    job_id = id,
                    execution_ms = descriptor.execution_ms(),
                    "Job completed"
                );
                Outcome::Success(bytes)
            }
            Ok(Err(message)) => {
                descriptor.mark_failed(message.clone(), done);
                self.stats
                    .record_failure(descriptor.execution_ms(), descriptor.queue_wait_ms());
                debug!(worker = self.index, job_id = id, error = %message, "Job failed");
                Outcome::Failure(TaskletError::UserError(message))
            }
            Err(panic) => {
                let message = panic_text(panic.as_ref());
                descriptor.mark_failed(message.clone(), done);
                self.stats
                    .record_failure(descriptor.execution_ms(), descriptor.queue_wait_ms());
                error!(worker = self.index, job_id = id, error = %message, "Job panicked");
                poisoned = true;
                Outcome::Failure(TaskletError::Internal(message))
            }
        };

        tasklet.complete(outcome.clone());
        self.finish(descriptor, outcome);
        poisoned
    }

    /// Shared tail of every terminal path: callback dispatch, observer
    /// notification, metrics, descriptor release.
    fn finish(&self, mut descriptor: JobDescriptor, outcome: Outcome) {
        let id = descriptor.id();
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

        self.collector.record_outcome(
            completion.state,
            completion.execution_ms / 1_000.0,
            completion.queue_wait_ms / 1_000.0,
        );
        self.collector.update_queue_depth(self.queue.len());
        self.memory.release_descriptor(descriptor);
    }
}

fn panic_text(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("worker panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("worker panic: {s}")
    } else {
        "worker panic".to_string()
    }
}
