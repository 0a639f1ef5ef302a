//! The controller's output.

use serde::{Deserialize, Serialize};

use super::pattern::{JobComplexity, WorkloadPattern};

/// Bounds on the recommended descriptor pool cap.
pub(crate) const POOL_MAX_FLOOR: usize = 32;
pub(crate) const POOL_MAX_CEILING: usize = 4096;

/// A consistent set of tuning suggestions, published atomically after each
/// analysis pass.
///
/// Invariants: at most one of `should_scale_up` / `should_scale_down` is
/// set; `worker_count >= 1`; `pool_initial_size <= pool_max_size`; every
/// confidence lies in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    /// Suggested worker thread count.
    pub worker_count: usize,
    /// Suggested critical memory threshold percent.
    pub memory_limit_percent: u8,
    /// Suggested per-job timeout in milliseconds.
    pub timeout_ms: u64,
    /// Suggested default priority for new submissions.
    pub priority: i32,
    /// Suggested submission batch size.
    pub batch_size: usize,
    /// Suggested descriptor pool pre-warm size.
    pub pool_initial_size: usize,
    /// Suggested descriptor pool cap.
    pub pool_max_size: usize,
    /// Suggested cleanup cadence in milliseconds.
    pub cleanup_interval_ms: u64,

    /// Raise the worker count.
    pub should_scale_up: bool,
    /// Lower the worker count.
    pub should_scale_down: bool,
    /// Apply `memory_limit_percent`.
    pub should_adjust_memory: bool,
    /// Apply `timeout_ms`.
    pub should_adjust_timeout: bool,
    /// Apply `priority`.
    pub should_adjust_priority: bool,
    /// Prefer batched submission at `batch_size`.
    pub should_batch: bool,
    /// Worker utilization is skewed; redistribute.
    pub should_rebalance: bool,

    /// Confidence in the worker suggestion, in [0, 1].
    pub worker_confidence: f64,
    /// Confidence in the memory suggestion, in [0, 1].
    pub memory_confidence: f64,
    /// Confidence in the timeout suggestion, in [0, 1].
    pub timeout_confidence: f64,
    /// Confidence in the batch suggestion, in [0, 1].
    pub batch_confidence: f64,
    /// Combined confidence, in [0, 1].
    pub overall_confidence: f64,

    /// Detected workload pattern.
    pub pattern: WorkloadPattern,
    /// Dominant job complexity over the window.
    pub complexity: JobComplexity,
}

impl Default for Recommendation {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            memory_limit_percent: 90,
            timeout_ms: 30_000,
            priority: 0,
            batch_size: 1,
            pool_initial_size: POOL_MAX_FLOOR,
            pool_max_size: POOL_MAX_FLOOR * 2,
            cleanup_interval_ms: 5_000,
            should_scale_up: false,
            should_scale_down: false,
            should_adjust_memory: false,
            should_adjust_timeout: false,
            should_adjust_priority: false,
            should_batch: false,
            should_rebalance: false,
            worker_confidence: 0.0,
            memory_confidence: 0.0,
            timeout_confidence: 0.0,
            batch_confidence: 0.0,
            overall_confidence: 0.0,
            pattern: WorkloadPattern::Mixed,
            complexity: JobComplexity::Trivial,
        }
    }
}

impl Recommendation {
    /// Checks the structural invariants. Used by tests and debug assertions.
    pub fn invariants_hold(&self) -> bool {
        let confidences = [
            self.worker_confidence,
            self.memory_confidence,
            self.timeout_confidence,
            self.batch_confidence,
            self.overall_confidence,
        ];
        self.worker_count >= 1
            && self.pool_initial_size <= self.pool_max_size
            && !(self.should_scale_up && self.should_scale_down)
            && confidences.iter().all(|c| (0.0..=1.0).contains(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_recommendation_is_valid() {
        let rec = Recommendation::default();
        assert!(rec.invariants_hold());
        assert!(rec.worker_count >= 1);
        assert_eq!(rec.overall_confidence, 0.0);
    }

    #[test]
    fn test_invariant_checks_catch_violations() {
        let mut rec = Recommendation::default();
        rec.should_scale_up = true;
        rec.should_scale_down = true;
        assert!(!rec.invariants_hold());

        let mut rec = Recommendation::default();
        rec.pool_initial_size = 100;
        rec.pool_max_size = 50;
        assert!(!rec.invariants_hold());

        let mut rec = Recommendation::default();
        rec.overall_confidence = 1.5;
        assert!(!rec.invariants_hold());
    }
}
