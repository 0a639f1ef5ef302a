//! Reusable descriptor pool.
//!
//! Job descriptors are pooled to amortize allocation under sustained
//! submission rates. The pool is soft-capped: a release while the free list
//! is at `max_size` drops the descriptor instead of keeping it.
//!
//! Accounting invariant, checked by tests:
//! `in_use + available + dropped == total_created`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::job::{JobDescriptor, JobId};

/// Default soft cap on pooled descriptors.
pub const DEFAULT_MAX_POOL_SIZE: usize = 256;

/// Counters describing pool state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolCounters {
    /// Descriptors allocated over the pool's lifetime.
    pub total_created: u64,
    /// Descriptors sitting in the free list.
    pub available_in_pool: usize,
    /// Descriptors currently owned by callers.
    pub in_use: u64,
    /// Descriptors destroyed (released at cap, or cleared).
    pub dropped: u64,
    /// Current soft cap.
    pub max_pool_size: usize,
}

/// Pool of reusable `JobDescriptor`s, also the id authority: every acquire
/// stamps the next monotone process-unique job id.
pub struct DescriptorPool {
    free: Mutex<Vec<JobDescriptor>>,
    max_size: AtomicUsize,
    next_id: AtomicU64,
    total_created: AtomicU64,
    in_use: AtomicU64,
    dropped: AtomicU64,
}

impl DescriptorPool {
    /// Creates a pool with the given soft cap, pre-warming `initial_size`
    /// descriptors.
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        let warm = initial_size.min(max_size);
        let mut free = Vec::with_capacity(warm);
        for _ in 0..warm {
            free.push(JobDescriptor::blank());
        }
        Self {
            free: Mutex::new(free),
            max_size: AtomicUsize::new(max_size),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(warm as u64),
            in_use: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns a reset descriptor with a fresh id, drawn from the free list
    /// when available and freshly allocated otherwise.
    pub fn acquire(&self) -> JobDescriptor {
        let mut descriptor = {
            let mut free = self.free.lock();
            free.pop()
        }
        .unwrap_or_else(|| {
            self.total_created.fetch_add(1, Ordering::SeqCst);
            JobDescriptor::blank()
        });

        let id: JobId = self.next_id.fetch_add(1, Ordering::SeqCst);
        descriptor.assign_id(id);
        self.in_use.fetch_add(1, Ordering::SeqCst);
        descriptor
    }

    /// Returns a descriptor to the pool, or drops it when the free list is
    /// at the soft cap.
    pub fn release(&self, mut descriptor: JobDescriptor) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        let max = self.max_size.load(Ordering::SeqCst);
        let mut free = self.free.lock();
        if free.len() < max {
            descriptor.reset();
            free.push(descriptor);
        } else {
            drop(free);
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Clears the free list; pooled descriptors are destroyed.
    pub fn clear(&self) {
        let mut free = self.free.lock();
        let cleared = free.len() as u64;
        free.clear();
        drop(free);
        self.dropped.fetch_add(cleared, Ordering::SeqCst);
    }

    /// Adjusts the soft cap. Applied on subsequent releases.
    pub fn set_max_size(&self, max_size: usize) {
        self.max_size.store(max_size, Ordering::SeqCst);
    }

    /// Returns the current counters.
    pub fn counters(&self) -> PoolCounters {
        PoolCounters {
            total_created: self.total_created.load(Ordering::SeqCst),
            available_in_pool: self.free.lock().len(),
            in_use: self.in_use.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            max_pool_size: self.max_size.load(Ordering::SeqCst),
        }
    }
}
