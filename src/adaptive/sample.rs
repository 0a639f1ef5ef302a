//! Metrics samples and the bounded history ring.
//!
//! One `MetricsSample` is captured per sampler tick (default every 1000 ms)
//! or on a forced analysis. Samples land in a bounded ring buffer; the
//! oldest is evicted on overflow. The buffer is single-writer (the cadence
//! thread) and multi-reader (the facade's history surface).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default ring buffer capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

/// One observation of runtime and host state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSample {
    /// Monotonic capture time in milliseconds since process start. Strictly
    /// increasing within one collector.
    pub timestamp_ms: u64,
    /// Host CPU utilization percent, in [0, 100].
    pub cpu_utilization: f64,
    /// Host memory usage percent, in [0, 100].
    pub memory_usage_percent: f64,
    /// Live worker threads.
    pub worker_count: usize,
    /// Share of workers busy with a job, in [0, 100].
    pub worker_utilization: f64,
    /// Jobs executing at capture time.
    pub active_jobs: usize,
    /// Jobs completed over the pool's lifetime.
    pub completed_jobs: u64,
    /// Jobs failed over the pool's lifetime.
    pub failed_jobs: u64,
    /// Jobs finished per second over the sample window.
    pub throughput: f64,
    /// Mean execution time over recent jobs, in milliseconds.
    pub avg_execution_time_ms: f64,
    /// Mean queue wait over recent jobs, in milliseconds.
    pub avg_queue_wait_ms: f64,
    /// Success percentage over finished jobs, in [0, 100].
    pub success_rate: f64,
}

/// Bounded ring of samples, oldest evicted on overflow.
#[derive(Debug)]
pub struct MetricsHistory {
    samples: VecDeque<MetricsSample>,
    capacity: usize,
}

impl MetricsHistory {
    /// Creates an empty history with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a sample, evicting the oldest at capacity. Timestamps are
    /// nudged forward if a caller races the clock, keeping them strictly
    /// increasing.
    pub fn push(&mut self, mut sample: MetricsSample) {
        if let Some(last) = self.samples.back() {
            if sample.timestamp_ms <= last.timestamp_ms {
                sample.timestamp_ms = last.timestamp_ms + 1;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns whether no samples have been captured yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The most recent sample.
    pub fn last(&self) -> Option<&MetricsSample> {
        self.samples.back()
    }

    /// The trailing `n` samples, oldest first.
    pub fn window(&self, n: usize) -> Vec<MetricsSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// All retained samples, oldest first.
    pub fn snapshot(&self) -> Vec<MetricsSample> {
        self.samples.iter().cloned().collect()
    }
}
