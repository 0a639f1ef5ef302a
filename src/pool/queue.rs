//! Bounded priority work queue.
//!
//! A single shared queue feeds all workers. Ordering is priority-first
//! (higher dequeues earlier); within a priority class, submission order
//! (FIFO) is preserved through a monotone sequence number.
//!
//! The queue is bounded: `push` blocks while full and the queue is open.
//! Closing wakes every waiter; remaining entries can then be drained so the
//! pool can fail them deterministically during shutdown.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::job::JobDescriptor;
use crate::tasklet::Tasklet;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// A descriptor travelling through the queue together with its shared
/// tasklet handle.
pub struct QueuedJob {
    /// The job's pooled state container, owned by the queue entry.
    pub descriptor: JobDescriptor,
    /// The shared handle used for pre-dequeue checks and completion.
    pub tasklet: Arc<Tasklet>,
    priority: i32,
    seq: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence (earlier
        // submission) first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Result of a `pop` attempt.
pub enum Pop {
    /// A job was dequeued.
    Job(QueuedJob),
    /// The wait elapsed with no job available.
    TimedOut,
    /// The queue is closed and fully drained.
    Closed,
}

struct QueueInner {
    heap: BinaryHeap<QueuedJob>,
    closed: bool,
}

/// Bounded priority queue shared by submitters and workers.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    next_seq: AtomicU64,
}

impl JobQueue {
    /// Creates an open queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Enqueues a job, blocking while the queue is full.
    ///
    /// Returns the job back to the caller if the queue is closed, so the
    /// caller can fail and release it.
    pub fn push(
        &self,
        descriptor: JobDescriptor,
        tasklet: Arc<Tasklet>,
    ) -> Result<(), (JobDescriptor, Arc<Tasklet>)> {
        let priority = descriptor.priority();
        let mut inner = self.inner.lock();
        while inner.heap.len() >= self.capacity && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err((descriptor, tasklet));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        inner.heap.push(QueuedJob {
            descriptor,
            tasklet,
            priority,
            seq,
        });
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the highest-priority job, waiting up to `timeout`.
    pub fn pop(&self, timeout: Duration) -> Pop {
        let mut inner = self.inner.lock();
        loop {
            if let Some(job) = inner.heap.pop() {
                drop(inner);
                self.not_full.notify_one();
                return Pop::Job(job);
            }
            if inner.closed {
                return Pop::Closed;
            }
            if self.not_empty.wait_for(&mut inner, timeout).timed_out() {
                return Pop::TimedOut;
            }
        }
    }

    /// Closes the queue and wakes all waiters. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Removes and returns all remaining entries in dequeue order.
    pub fn drain(&self) -> Vec<QueuedJob> {
        let mut inner = self.inner.lock();
        let mut drained = Vec::with_capacity(inner.heap.len());
        while let Some(job) = inner.heap.pop() {
            drained.push(job);
        }
        drop(inner);
        self.not_full.notify_all();
        drained
    }

    /// Number of queued jobs.
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
