//! Custom metric collectors for tasklets operations.
//!
//! This module provides a high-level interface for recording runtime
//! metrics. The `MetricsCollector` struct wraps the raw Prometheus metrics
//! and provides convenient methods for common operations. Every method is a
//! no-op until `init_metrics` has been called.

use crate::job::JobState;
use crate::memory::PoolCounters;

use super::prometheus::{
    ACTIVE_TASKLETS, ACTIVE_WORKERS, DESCRIPTORS_AVAILABLE, DESCRIPTORS_IN_USE,
    JOBS_FINISHED_TOTAL, JOBS_SUBMITTED_TOTAL, JOB_EXECUTION_SECONDS, JOB_QUEUE_WAIT_SECONDS,
    MEMORY_USAGE_PERCENT, QUEUE_DEPTH,
};

/// Metrics collector for recording tasklets operational metrics.
///
/// This struct provides a convenient interface for recording metrics
/// throughout the runtime. It wraps the underlying Prometheus metrics and
/// ensures consistent labeling.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    ///
    /// Note: Metrics must be initialized with `init_metrics()` before
    /// calling any recording methods.
    pub fn new() -> Self {
        Self
    }

    /// Record a job submission.
    pub fn record_submitted(&self) {
        if let Some(counter) = JOBS_SUBMITTED_TOTAL.get() {
            counter.inc();
        }
    }

    /// Record a terminal transition with its durations in seconds.
    pub fn record_outcome(&self, state: JobState, execution_secs: f64, queue_wait_secs: f64) {
        let label = match state {
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            // Non-terminal states are never recorded here.
            JobState::Pending | JobState::Running => return,
        };

        if let Some(finished) = JOBS_FINISHED_TOTAL.get() {
            finished.with_label_values(&[label]).inc();
        }
        if execution_secs > 0.0 {
            if let Some(histogram) = JOB_EXECUTION_SECONDS.get() {
                histogram.observe(execution_secs);
            }
        }
        if queue_wait_secs > 0.0 {
            if let Some(histogram) = JOB_QUEUE_WAIT_SECONDS.get() {
                histogram.observe(queue_wait_secs);
            }
        }
    }

    /// Update the work queue depth.
    pub fn update_queue_depth(&self, depth: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.set(depth as f64);
        }
    }

    /// Update the count of live workers.
    pub fn update_workers(&self, count: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.set(count as f64);
        }
    }

    /// Update the count of registered tasklets.
    pub fn update_tasklets(&self, count: usize) {
        if let Some(gauge) = ACTIVE_TASKLETS.get() {
            gauge.set(count as f64);
        }
    }

    /// Update the descriptor pool gauges.
    pub fn update_descriptor_pool(&self, counters: &PoolCounters) {
        if let Some(gauge) = DESCRIPTORS_AVAILABLE.get() {
            gauge.set(counters.available_in_pool as f64);
        }
        if let Some(gauge) = DESCRIPTORS_IN_USE.get() {
            gauge.set(counters.in_use as f64);
        }
    }

    /// Update the observed system memory usage percent.
    pub fn update_memory_percent(&self, percent: f64) {
        if let Some(gauge) = MEMORY_USAGE_PERCENT.get() {
            gauge.set(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_collector_is_zero_sized() {
        let collector = MetricsCollector::new();
        assert_eq!(std::mem::size_of_val(&collector), 0);
    }

    #[test]
    fn test_record_outcomes() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_submitted();
        collector.record_outcome(JobState::Completed, 0.12, 0.001);
        collector.record_outcome(JobState::Failed, 0.05, 0.002);
        collector.record_outcome(JobState::Cancelled, 0.0, 0.0);
        // Non-terminal states are ignored without panicking.
        collector.record_outcome(JobState::Pending, 0.0, 0.0);
        collector.record_outcome(JobState::Running, 0.0, 0.0);
    }

    #[test]
    fn test_gauge_updates() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.update_queue_depth(42);
        collector.update_workers(8);
        collector.update_tasklets(3);
        collector.update_memory_percent(55.5);
        collector.update_descriptor_pool(&PoolCounters {
            total_created: 4,
            available_in_pool: 2,
            in_use: 2,
            dropped: 0,
            max_pool_size: 256,
        });
    }
}
