//! The adaptive controller.
//!
//! A cadence thread samples pool, memory, and host figures once per interval
//! (default 1000 ms), classifies the trailing window, and publishes a fresh
//! `Recommendation` through an atomically swapped snapshot: readers never
//! block a pass and a pass never blocks readers.
//!
//! The controller is purely observational. It cannot fail a job; its worst
//! outcome is a stale recommendation. Registered adjustment callbacks run on
//! the cadence thread; a panicking callback is logged and skipped.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, trace};

use crate::pool::{JobCompletion, JobObserver, PoolStats};
use crate::utils::clock::monotonic_millis;

use super::pattern::{
    classify_pattern, mean, percentile, variance, JobComplexity, Strategy, WorkloadPattern,
};
use super::recommendation::{Recommendation, POOL_MAX_CEILING, POOL_MAX_FLOOR};
use super::sample::{MetricsHistory, MetricsSample, DEFAULT_HISTORY_CAPACITY};

/// Default sampling cadence.
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1_000;
/// Default trailing window used for classification.
const DEFAULT_WINDOW: usize = 32;
/// Per-job duration figures retained for percentile math.
const DURATION_WINDOW: usize = 512;
/// Batch sizes retained for the batch recommendation.
const BATCH_WINDOW: usize = 64;
/// Minimum confidence required to raise a scale flag.
const SCALE_CONFIDENCE_FLOOR: f64 = 0.6;
/// Worker utilization percent below which rebalancing is suggested.
const REBALANCE_UTILIZATION_PERCENT: f64 = 30.0;
/// Fallback timeout recommendation with no execution history.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Memory mean above which `should_adjust_memory` is raised.
const MEM_MEAN_ADJUST_PERCENT: f64 = 70.0;

/// Where the sampler reads pool and host figures from.
///
/// The runtime wires this to its pool, memory manager, and system monitor;
/// tests substitute fixtures.
pub trait StatsSource: Send + Sync {
    /// Current pool snapshot.
    fn pool_stats(&self) -> PoolStats;
    /// Refreshes host counters and returns `(cpu_percent, memory_percent)`.
    fn host_utilization(&self) -> (f64, f64);
}

/// Configuration for the controller.
#[derive(Debug, Clone)]
pub struct AdaptiveControllerConfig {
    /// Sampling cadence in milliseconds.
    pub sample_interval_ms: u64,
    /// Trailing samples considered by classification.
    pub window: usize,
    /// Ring buffer capacity for the metrics history.
    pub history_capacity: usize,
}

impl Default for AdaptiveControllerConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: DEFAULT_SAMPLE_INTERVAL_MS,
            window: DEFAULT_WINDOW,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

type AdjustmentCallback = Box<dyn Fn(&Recommendation) + Send>;

struct ControllerInner {
    execution_ms: VecDeque<f64>,
    queue_wait_ms: VecDeque<f64>,
    complexity_counts: [u64; 5],
    batch_sizes: VecDeque<f64>,
    arrivals: VecDeque<f64>,
    active_samples: VecDeque<usize>,
    last_finished_total: u64,
    last_submitted_total: u64,
    last_sample_time_ms: u64,
}

impl ControllerInner {
    fn new() -> Self {
        Self {
            execution_ms: VecDeque::with_capacity(DURATION_WINDOW),
            queue_wait_ms: VecDeque::with_capacity(DURATION_WINDOW),
            complexity_counts: [0; 5],
            batch_sizes: VecDeque::with_capacity(BATCH_WINDOW),
            arrivals: VecDeque::new(),
            active_samples: VecDeque::new(),
            last_finished_total: 0,
            last_submitted_total: 0,
            last_sample_time_ms: 0,
        }
    }

    fn dominant_complexity(&self) -> JobComplexity {
        let variants = [
            JobComplexity::Trivial,
            JobComplexity::Simple,
            JobComplexity::Moderate,
            JobComplexity::Complex,
            JobComplexity::Heavy,
        ];
        let mut best = 0;
        for (i, count) in self.complexity_counts.iter().enumerate() {
            if *count > self.complexity_counts[best] {
                best = i;
            }
        }
        variants[best]
    }
}

/// Observes runtime metrics, classifies the workload, and emits
/// recommendations.
pub struct AdaptiveController {
    config: AdaptiveControllerConfig,
    strategy: Mutex<Strategy>,
    enabled: AtomicBool,
    inner: Mutex<ControllerInner>,
    history: RwLock<MetricsHistory>,
    current: ArcSwap<Recommendation>,
    callbacks: Mutex<Vec<AdjustmentCallback>>,
    source: Mutex<Option<Arc<dyn StatsSource>>>,
    cadence_gate: Mutex<bool>,
    cadence_wake: Condvar,
    cadence_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AdaptiveController {
    /// Creates a controller with the given cadence configuration.
    pub fn new(config: AdaptiveControllerConfig) -> Self {
        Self {
            history: RwLock::new(MetricsHistory::new(config.history_capacity)),
            config,
            strategy: Mutex::new(Strategy::Moderate),
            enabled: AtomicBool::new(true),
            inner: Mutex::new(ControllerInner::new()),
            current: ArcSwap::from_pointee(Recommendation::default()),
            callbacks: Mutex::new(Vec::new()),
            source: Mutex::new(None),
            cadence_gate: Mutex::new(false),
            cadence_wake: Condvar::new(),
            cadence_handle: Mutex::new(None),
        }
    }

    /// Wires the stats source and starts the cadence thread.
    pub fn start(self: &Arc<Self>, source: Arc<dyn StatsSource>) {
        *self.source.lock() = Some(Arc::clone(&source));

        let weak: Weak<AdaptiveController> = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("tasklets-adaptive".to_string())
            .spawn(move || loop {
                let controller = match weak.upgrade() {
                    Some(c) => c,
                    None => break,
                };

                let interval = Duration::from_millis(controller.config.sample_interval_ms);
                let stopped = {
                    let mut gate = controller.cadence_gate.lock();
                    if !*gate {
                        controller.cadence_wake.wait_for(&mut gate, interval);
                    }
                    *gate
                };
                if stopped {
                    break;
                }

                controller.run_analysis_pass();
            })
            .expect("failed to spawn adaptive cadence thread");

        *self.cadence_handle.lock() = Some(handle);
        info!(
            interval_ms = self.config.sample_interval_ms,
            window = self.config.window,
            "Adaptive controller started"
        );
    }

    /// Stops the cadence thread and waits for it to exit.
    pub fn stop(&self) {
        {
            let mut gate = self.cadence_gate.lock();
            *gate = true;
        }
        self.cadence_wake.notify_all();
        if let Some(handle) = self.cadence_handle.lock().take() {
            if handle.join().is_err() {
                error!("Adaptive cadence thread panicked");
            }
        }
    }

    /// Records per-job figures after a terminal transition.
    pub fn record_job_metrics(&self, completion: &JobCompletion) {
        let mut inner = self.inner.lock();
        if inner.execution_ms.len() == DURATION_WINDOW {
            inner.execution_ms.pop_front();
        }
        inner.execution_ms.push_back(completion.execution_ms);
        if inner.queue_wait_ms.len() == DURATION_WINDOW {
            inner.queue_wait_ms.pop_front();
        }
        inner.queue_wait_ms.push_back(completion.queue_wait_ms);

        let complexity = JobComplexity::from_execution_ms(completion.execution_ms);
        inner.complexity_counts[complexity as usize] += 1;
    }

    /// Records an observed batch submission size.
    pub fn record_batch_pattern(&self, size: usize) {
        let mut inner = self.inner.lock();
        if inner.batch_sizes.len() == BATCH_WINDOW {
            inner.batch_sizes.pop_front();
        }
        inner.batch_sizes.push_back(size as f64);
    }

    /// The current recommendation snapshot. Consistent across calls until
    /// the next analysis pass swaps it.
    pub fn get_recommendations(&self) -> Arc<Recommendation> {
        self.current.load_full()
    }

    /// The workload pattern of the current recommendation.
    pub fn detected_pattern(&self) -> WorkloadPattern {
        self.current.load().pattern
    }

    /// The retained metrics samples, oldest first.
    pub fn metrics_history(&self) -> Vec<MetricsSample> {
        self.history.read().snapshot()
    }

    /// Runs an immediate analysis pass and refreshes the recommendation.
    ///
    /// With no stats source wired (or an empty history) this still publishes
    /// a valid default-shaped recommendation with low confidence.
    pub fn force_analysis(&self) {
        let source = self.source.lock().clone();
        match source {
            Some(source) => self.sample_and_analyze(&source),
            None => {
                let recommendation = self.build_recommendation(&PoolStats::default());
                debug_assert!(recommendation.invariants_hold());
                self.current.store(Arc::new(recommendation));
            }
        }
    }

    /// Invokes the registered adjustment callbacks with the current
    /// recommendation. No-op when none are registered or the controller is
    /// disabled.
    pub fn apply_recommendations(&self) {
        if !self.is_enabled() {
            return;
        }
        let recommendation = self.current.load_full();
        self.fire_callbacks(&recommendation);
    }

    /// Registers a listener called after each analysis pass.
    pub fn register_adjustment_callback(
        &self,
        callback: impl Fn(&Recommendation) + Send + 'static,
    ) {
        self.callbacks.lock().push(Box::new(callback));
    }

    /// Sets the sensitivity strategy.
    pub fn set_strategy(&self, strategy: Strategy) {
        *self.strategy.lock() = strategy;
        debug!(strategy = ?strategy, "Strategy changed");
    }

    /// The current sensitivity strategy.
    pub fn strategy(&self) -> Strategy {
        *self.strategy.lock()
    }

    /// Master switch. Metrics are still recorded while disabled, but no
    /// callbacks fire.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns whether the apply path is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn run_analysis_pass(&self) {
        let source = self.source.lock().clone();
        if let Some(source) = source {
            self.sample_and_analyze(&source);
        }
    }

    fn sample_and_analyze(&self, source: &Arc<dyn StatsSource>) {
        let (cpu, memory) = source.host_utilization();
        let stats = source.pool_stats();
        let now_ms = monotonic_millis();

        let sample = {
            let mut inner = self.inner.lock();

            let elapsed_ms = if inner.last_sample_time_ms == 0 {
                self.config.sample_interval_ms
            } else {
                (now_ms - inner.last_sample_time_ms).max(1)
            };
            inner.last_sample_time_ms = now_ms;

            let finished = stats.completed_jobs + stats.failed_jobs;
            let finished_delta = finished.saturating_sub(inner.last_finished_total);
            inner.last_finished_total = finished;
            let throughput = finished_delta as f64 / (elapsed_ms as f64 / 1_000.0);

            let submitted_delta = stats
                .total_submitted
                .saturating_sub(inner.last_submitted_total);
            inner.last_submitted_total = stats.total_submitted;
            if inner.arrivals.len() == self.config.window {
                inner.arrivals.pop_front();
            }
            inner.arrivals.push_back(submitted_delta as f64);

            if inner.active_samples.len() == self.config.window {
                inner.active_samples.pop_front();
            }
            inner.active_samples.push_back(stats.active_jobs);

            let execs: Vec<f64> = inner.execution_ms.iter().copied().collect();
            let waits: Vec<f64> = inner.queue_wait_ms.iter().copied().collect();

            MetricsSample {
                timestamp_ms: now_ms,
                cpu_utilization: cpu.clamp(0.0, 100.0),
                memory_usage_percent: memory.clamp(0.0, 100.0),
                worker_count: stats.worker_threads,
                worker_utilization: if stats.worker_threads > 0 {
                    (stats.active_jobs as f64 / stats.worker_threads as f64 * 100.0)
                        .clamp(0.0, 100.0)
                } else {
                    0.0
                },
                active_jobs: stats.active_jobs,
                completed_jobs: stats.completed_jobs,
                failed_jobs: stats.failed_jobs,
                throughput: throughput.max(0.0),
                avg_execution_time_ms: mean(&execs),
                avg_queue_wait_ms: mean(&waits),
                success_rate: stats.success_rate(),
            }
        };

        self.history.write().push(sample);

        let recommendation = self.build_recommendation(&stats);
        debug_assert!(recommendation.invariants_hold());
        trace!(
            pattern = %recommendation.pattern,
            workers = recommendation.worker_count,
            confidence = recommendation.overall_confidence,
            "Analysis pass"
        );
        self.current.store(Arc::new(recommendation.clone()));

        if self.is_enabled() {
            self.fire_callbacks(&recommendation);
        }
    }

    fn fire_callbacks(&self, recommendation: &Recommendation) {
        let callbacks = self.callbacks.lock();
        for callback in callbacks.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| callback(recommendation)));
            if result.is_err() {
                error!("Adjustment callback panicked; continuing");
            }
        }
    }

    fn build_recommendation(&self, stats: &PoolStats) -> Recommendation {
        let window = self.history.read().window(self.config.window);
        let (execs, arrivals, batch_mean, active_peak, complexity) = {
            let inner = self.inner.lock();
            (
                inner.execution_ms.iter().copied().collect::<Vec<f64>>(),
                inner.arrivals.iter().copied().collect::<Vec<f64>>(),
                mean(&inner.batch_sizes.iter().copied().collect::<Vec<f64>>()),
                inner.active_samples.iter().copied().max().unwrap_or(0),
                inner.dominant_complexity(),
            )
        };

        let strategy = self.strategy();
        let pattern = classify_pattern(&window, &arrivals);
        let host_cores = num_cpus::get().max(1);
        let current_workers = stats.worker_threads.max(1);

        let worker_count = match pattern {
            WorkloadPattern::CpuIntensive => host_cores,
            WorkloadPattern::IoIntensive => host_cores * strategy.io_worker_multiplier(),
            WorkloadPattern::MemoryIntensive => (host_cores / 2).max(1),
            WorkloadPattern::Burst => host_cores + 2,
            WorkloadPattern::Steady => current_workers,
            WorkloadPattern::Mixed => host_cores,
        }
        .max(1);

        // Confidence: a sigmoid over the sample count, saturating near 64
        // samples, shrunk by the coefficient of variation of execution times.
        let sample_base = 1.0 / (1.0 + (-((window.len() as f64) - 32.0) / 8.0).exp());
        let exec_mean = mean(&execs);
        let exec_cv = if exec_mean > 0.0 {
            variance(&execs).sqrt() / exec_mean
        } else {
            0.0
        };
        let steadiness = 1.0 / (1.0 + exec_cv);

        let worker_confidence = (sample_base * steadiness).clamp(0.0, 1.0);
        let timeout_confidence = if execs.is_empty() {
            0.0
        } else {
            (sample_base * steadiness).clamp(0.0, 1.0)
        };
        let mem_values: Vec<f64> = window.iter().map(|s| s.memory_usage_percent).collect();
        let mem_mean = mean(&mem_values);
        let mem_cv = if mem_mean > 0.0 {
            variance(&mem_values).sqrt() / mem_mean
        } else {
            0.0
        };
        let memory_confidence = (sample_base / (1.0 + mem_cv)).clamp(0.0, 1.0);
        let batch_confidence = sample_base.clamp(0.0, 1.0);
        let overall_confidence =
            (worker_confidence + timeout_confidence + memory_confidence + batch_confidence) / 4.0;

        let relative_delta =
            (worker_count as f64 - current_workers as f64).abs() / current_workers as f64;
        let scale_eligible = relative_delta > strategy.scale_threshold()
            && worker_confidence >= SCALE_CONFIDENCE_FLOOR;
        let should_scale_up = scale_eligible && worker_count > current_workers;
        let should_scale_down = scale_eligible && worker_count < current_workers;

        let batch_size = match pattern {
            WorkloadPattern::IoIntensive | WorkloadPattern::MemoryIntensive => 1,
            WorkloadPattern::CpuIntensive => {
                if exec_mean < 1.0 {
                    128
                } else if exec_mean < 10.0 {
                    64
                } else if exec_mean < 100.0 {
                    32
                } else {
                    16
                }
            }
            _ => (batch_mean.round() as usize).clamp(1, 16),
        };

        let timeout_ms = if execs.is_empty() {
            DEFAULT_TIMEOUT_MS
        } else {
            ((percentile(&execs, 95.0) * strategy.timeout_safety_factor()).ceil() as u64).max(1)
        };

        let pool_initial = active_peak.max(1).min(POOL_MAX_CEILING);
        let pool_max = (pool_initial * 2).clamp(POOL_MAX_FLOOR, POOL_MAX_CEILING);
        let pool_initial = pool_initial.min(pool_max);

        let cleanup_interval_ms = if mem_mean > 90.0 {
            100
        } else if mem_mean > 75.0 {
            1_000
        } else {
            5_000
        };

        let (priority, should_adjust_priority) = match pattern {
            WorkloadPattern::Burst => (1, true),
            _ => (0, false),
        };

        let utilization_mean = mean(
            &window
                .iter()
                .map(|s| s.worker_utilization)
                .collect::<Vec<f64>>(),
        );

        Recommendation {
            worker_count,
            memory_limit_percent: if pattern == WorkloadPattern::MemoryIntensive {
                80
            } else {
                90
            },
            timeout_ms,
            priority,
            batch_size,
            pool_initial_size: pool_initial,
            pool_max_size: pool_max,
            cleanup_interval_ms,
            should_scale_up,
            should_scale_down,
            should_adjust_memory: pattern == WorkloadPattern::MemoryIntensive
                || mem_mean > MEM_MEAN_ADJUST_PERCENT,
            should_adjust_timeout: !execs.is_empty(),
            should_adjust_priority,
            should_batch: batch_size > 1,
            should_rebalance: utilization_mean < REBALANCE_UTILIZATION_PERCENT
                && stats.pending_jobs > 0,
            worker_confidence,
            memory_confidence,
            timeout_confidence,
            batch_confidence,
            overall_confidence: overall_confidence.clamp(0.0, 1.0),
            pattern,
            complexity,
        }
    }
}

impl JobObserver for AdaptiveController {
    fn on_job_complete(&self, completion: &JobCompletion) {
        self.record_job_metrics(completion);
    }
}
