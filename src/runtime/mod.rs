//! The runtime facade.
//!
//! A `Runtime` value owns the three subsystems (memory manager, thread
//! pool, adaptive controller) plus the host-loop bridge, wired by explicit
//! dependency. High-level operations (`run`, `run_all`, `batch`, `retry`)
//! are futures composed over the low-level `spawn` / `join` / result
//! surface.
//!
//! # Example
//!
//! ```rust,ignore
//! use tasklets::{Config, Runtime};
//!
//! let runtime = Runtime::with_config(Config::new().with_workers(4))?;
//! let payload = runtime
//!     .run(tasklets::job::from_fn(|| Ok::<_, String>("42".to_string())))
//!     .await?;
//! assert_eq!(payload, b"42");
//! runtime.shutdown(std::time::Duration::from_millis(500));
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::adaptive::{
    AdaptiveController, AdaptiveControllerConfig, MetricsSample, Recommendation, StatsSource,
    Strategy, WorkloadPattern,
};
use crate::config::Config;
use crate::error::TaskletError;
use crate::host::{HostLoop, HostSignal, RuntimeEvent};
use crate::job::{JobId, JobOptions, JobState, Outcome, Work};
use crate::memory::{MemoryManager, MemoryManagerConfig, MemoryStats};
use crate::metrics::{self, MetricsCollector};
use crate::pool::{JobObserver, PoolStats, ThreadPool, ThreadPoolConfig};
use crate::system::{SystemInfo, SystemMonitor};

/// Progress callback for `batch`: `(completed, total, name)`, invoked on the
/// host loop. Ordering across concurrently completing jobs is unspecified.
pub type ProgressCallback = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;

/// One batch item's terminal result.
#[derive(Debug, Clone)]
pub struct NamedOutcome {
    /// The caller-assigned item name.
    pub name: String,
    /// The item's terminal outcome.
    pub outcome: Outcome,
}

/// Retry policy for `retry`: `attempts` tries with a delay of
/// `delay_ms * backoff^(attempt - 1)` between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Base delay before the first resubmission, in milliseconds.
    pub delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 100,
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt count.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    /// Sets the base delay in milliseconds.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff(mut self, backoff: f64) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Coarse health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Under load or memory warning; still accepting work.
    Degraded,
    /// Refusing work (memory pressure) or no live workers.
    Critical,
}

/// Snapshot of runtime health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// The overall classification.
    pub status: HealthStatus,
    /// Live worker threads.
    pub worker_threads: usize,
    /// Jobs executing right now.
    pub active_jobs: usize,
    /// Jobs waiting in the queue.
    pub queue_depth: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// System memory usage percent.
    pub memory_usage_percent: f64,
    /// Human-readable reasons behind a non-healthy status.
    pub reasons: Vec<String>,
}

/// Stats source wired from the runtime's own components.
///
/// Weak references break the controller -> source -> pool -> observer ->
/// controller cycle.
struct RuntimeStatsSource {
    pool: Weak<ThreadPool>,
    memory: Weak<MemoryManager>,
    monitor: Arc<SystemMonitor>,
    collector: MetricsCollector,
}

impl StatsSource for RuntimeStatsSource {
    fn pool_stats(&self) -> PoolStats {
        self.pool
            .upgrade()
            .map(|pool| pool.stats())
            .unwrap_or_default()
    }

    fn host_utilization(&self) -> (f64, f64) {
        self.monitor.refresh();
        let cpu = self.monitor.cpu_percent();
        let memory_percent = self.monitor.memory_percent();

        self.collector.update_memory_percent(memory_percent);
        if let Some(memory) = self.memory.upgrade() {
            let stats = memory.stats();
            self.collector.update_descriptor_pool(&stats.pool);
            self.collector.update_tasklets(stats.active_tasklets);
        }

        (cpu, memory_percent)
    }
}

/// The tasklets runtime.
///
/// Dropping the runtime performs a best-effort shutdown with a short grace
/// window; call `shutdown` explicitly to control the grace period.
pub struct Runtime {
    config: Config,
    monitor: Arc<SystemMonitor>,
    memory: Arc<MemoryManager>,
    pool: Arc<ThreadPool>,
    controller: Arc<AdaptiveController>,
    host: Arc<HostLoop>,
    shutdown_started: AtomicBool,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Result<Self, TaskletError> {
        Self::with_config(Config::default())
    }

    /// Creates a runtime from a dynamic option bag (see `Config::from_value`).
    pub fn from_options(options: &serde_json::Value) -> Result<Self, TaskletError> {
        Self::with_config(Config::from_value(options)?)
    }

    /// Creates a runtime with the given configuration.
    pub fn with_config(config: Config) -> Result<Self, TaskletError> {
        config.validate()?;
        crate::logging::init(config.logging);
        if let Err(e) = metrics::init_metrics() {
            warn!(error = %e, "Metrics initialization failed; continuing without");
        }

        let monitor = Arc::new(SystemMonitor::new());
        monitor.refresh();

        let memory = Arc::new(MemoryManager::new(
            MemoryManagerConfig {
                critical_threshold_percent: u64::from(config.max_memory_percent),
                ..Default::default()
            },
            Arc::clone(&monitor),
        ));
        memory.start_cleanup_task();

        let host = HostLoop::start();

        let pool = Arc::new(ThreadPool::new(
            ThreadPoolConfig {
                workers: config.resolved_workers(),
                default_timeout_ms: config.timeout_ms,
                idle_timeout_ms: config.idle_timeout_ms,
                min_workers: config.min_workers,
                ..Default::default()
            },
            Arc::clone(&memory),
            Arc::clone(&host) as Arc<dyn HostSignal>,
        ));

        let controller = Arc::new(AdaptiveController::new(AdaptiveControllerConfig::default()));
        pool.add_observer(Arc::clone(&controller) as Arc<dyn JobObserver>);
        controller.set_enabled(config.adaptive);

        if config.adaptive {
            let weak_pool = Arc::downgrade(&pool);
            let weak_memory = Arc::downgrade(&memory);
            let weak_host = Arc::downgrade(&host);
            let min_workers = config.min_workers;
            controller.register_adjustment_callback(move |rec| {
                if apply_recommendation(rec, &weak_pool, &weak_memory, min_workers) {
                    if let Some(host) = weak_host.upgrade() {
                        host.emit(RuntimeEvent::RecommendationApplied);
                    }
                }
            });
        }

        let source = Arc::new(RuntimeStatsSource {
            pool: Arc::downgrade(&pool),
            memory: Arc::downgrade(&memory),
            monitor: Arc::clone(&monitor),
            collector: MetricsCollector::new(),
        });
        controller.start(source as Arc<dyn StatsSource>);

        info!(
            workers = config.resolved_workers(),
            adaptive = config.adaptive,
            "Tasklets runtime started"
        );

        Ok(Self {
            config,
            monitor,
            memory,
            pool,
            controller,
            host,
            shutdown_started: AtomicBool::new(false),
        })
    }

    // ---- high-level operations ------------------------------------------

    /// Submits one job and resolves with its payload, or rejects with the
    /// failure kind.
    pub async fn run(&self, work: impl Work) -> Result<Vec<u8>, TaskletError> {
        self.run_with(work, JobOptions::new()).await
    }

    /// Like `run`, with per-job options. A caller-supplied completion
    /// callback still fires on the host loop before the future resolves.
    pub async fn run_with(
        &self,
        work: impl Work,
        options: JobOptions,
    ) -> Result<Vec<u8>, TaskletError> {
        let (id, rx) = self.submit_with_channel(Box::new(work), options)?;
        let outcome = rx
            .await
            .map_err(|_| TaskletError::Internal("completion channel dropped".to_string()))?;
        let _ = self.memory.mark_for_cleanup(id);
        outcome.into_result()
    }

    /// Submits every work item and resolves once all reach a terminal
    /// state, preserving submission order in the result.
    pub async fn run_all(
        &self,
        works: Vec<Box<dyn Work>>,
    ) -> Result<Vec<Outcome>, TaskletError> {
        self.controller.record_batch_pattern(works.len());

        let mut ids = Vec::with_capacity(works.len());
        let mut receivers = Vec::with_capacity(works.len());
        for work in works {
            let (id, rx) = self.submit_with_channel(work, JobOptions::new())?;
            ids.push(id);
            receivers.push(rx);
        }

        let results = futures::future::join_all(receivers).await;
        let mut outcomes = Vec::with_capacity(results.len());
        for (id, result) in ids.into_iter().zip(results) {
            let outcome = result
                .map_err(|_| TaskletError::Internal("completion channel dropped".to_string()))?;
            let _ = self.memory.mark_for_cleanup(id);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Like `run_all` with named items and `(completed, total, name)`
    /// progress callbacks delivered on the host loop.
    pub async fn batch(
        &self,
        items: Vec<(String, Box<dyn Work>)>,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<NamedOutcome>, TaskletError> {
        let total = items.len();
        let completed = Arc::new(AtomicUsize::new(0));
        self.controller.record_batch_pattern(total);

        let mut pending = Vec::with_capacity(total);
        let mut receivers = Vec::with_capacity(total);
        for (name, work) in items {
            let (tx, rx) = oneshot::channel::<Outcome>();
            let progress = progress.clone();
            let completed = Arc::clone(&completed);
            let callback_name = name.clone();
            let options = JobOptions::new().with_callback(move |_id, outcome: &Outcome| {
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = progress {
                    progress(done, total, &callback_name);
                }
                let _ = tx.send(outcome.clone());
            });

            let id = self.pool.submit(work, options)?;
            pending.push((name, id));
            receivers.push(rx);
        }

        let results = futures::future::join_all(receivers).await;
        let mut outcomes = Vec::with_capacity(results.len());
        for ((name, id), result) in pending.into_iter().zip(results) {
            let outcome = result
                .map_err(|_| TaskletError::Internal("completion channel dropped".to_string()))?;
            let _ = self.memory.mark_for_cleanup(id);
            outcomes.push(NamedOutcome { name, outcome });
        }
        Ok(outcomes)
    }

    /// Submits work produced by `factory`, resubmitting on failure with
    /// exponential backoff. Gives up with the last error.
    pub async fn retry<F>(
        &self,
        mut factory: F,
        policy: RetryPolicy,
    ) -> Result<Vec<u8>, TaskletError>
    where
        F: FnMut() -> Box<dyn Work>,
    {
        let attempts = policy.attempts.max(1);
        let mut last_error = TaskletError::Internal("retry never attempted".to_string());

        for attempt in 1..=attempts {
            let (id, rx) = self.submit_with_channel(factory(), JobOptions::new())?;
            let outcome = rx
                .await
                .map_err(|_| TaskletError::Internal("completion channel dropped".to_string()))?;
            let _ = self.memory.mark_for_cleanup(id);

            match outcome.into_result() {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    debug!(attempt, error = %err, "Attempt failed");
                    last_error = err;
                    if attempt < attempts {
                        let delay_ms = policy.delay_ms as f64
                            * policy.backoff.powi(attempt as i32 - 1);
                        tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    fn submit_with_channel(
        &self,
        work: Box<dyn Work>,
        mut options: JobOptions,
    ) -> Result<(JobId, oneshot::Receiver<Outcome>), TaskletError> {
        let (tx, rx) = oneshot::channel::<Outcome>();
        let caller_callback = options.on_complete.take();
        options.on_complete = Some(Box::new(move |id, outcome: &Outcome| {
            if let Some(callback) = caller_callback {
                callback(id, outcome);
            }
            let _ = tx.send(outcome.clone());
        }));

        let id = self.pool.submit(work, options)?;
        Ok((id, rx))
    }

    // ---- low-level surface ----------------------------------------------

    /// Enrolls one job with default options; returns its id.
    pub fn spawn(&self, work: impl Work) -> Result<JobId, TaskletError> {
        self.pool.submit(Box::new(work), JobOptions::new())
    }

    /// Enrolls one job with the given options; returns its id.
    pub fn spawn_with(
        &self,
        work: impl Work,
        options: JobOptions,
    ) -> Result<JobId, TaskletError> {
        self.pool.submit(Box::new(work), options)
    }

    /// Enrolls `count` jobs produced by `factory(index)`.
    pub fn spawn_many<F>(&self, count: usize, mut factory: F) -> Result<Vec<JobId>, TaskletError>
    where
        F: FnMut(usize) -> Box<dyn Work>,
    {
        self.controller.record_batch_pattern(count);
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            ids.push(self.pool.submit(factory(index), JobOptions::new())?);
        }
        Ok(ids)
    }

    /// Blocks the calling thread until the job finishes.
    pub fn join(&self, id: JobId) -> Result<Outcome, TaskletError> {
        self.pool.join(id)
    }

    /// Joins every id in order.
    pub fn join_many(&self, ids: &[JobId]) -> Result<Vec<Outcome>, TaskletError> {
        ids.iter().map(|id| self.pool.join(*id)).collect()
    }

    /// The job's result string, if it completed successfully.
    pub fn get_result(&self, id: JobId) -> Result<Option<String>, TaskletError> {
        Ok(self
            .pool
            .try_result(id)?
            .and_then(|outcome| outcome.result_string()))
    }

    /// The job's error text, if it failed or was cancelled.
    pub fn get_error(&self, id: JobId) -> Result<Option<String>, TaskletError> {
        Ok(self
            .pool
            .try_result(id)?
            .and_then(|outcome| outcome.error_text()))
    }

    /// Whether the job finished with an error.
    pub fn has_error(&self, id: JobId) -> Result<bool, TaskletError> {
        Ok(self
            .pool
            .try_result(id)?
            .map(|outcome| !outcome.is_success())
            .unwrap_or(false))
    }

    /// The job's current state.
    pub fn get_status(&self, id: JobId) -> Result<JobState, TaskletError> {
        let tasklet = self
            .memory
            .lookup(id)
            .ok_or(TaskletError::UnknownId(id))?;
        Ok(tasklet.status())
    }

    /// Attempts to cancel a pending job.
    pub fn cancel(&self, id: JobId) -> Result<bool, TaskletError> {
        self.pool.cancel(id)
    }

    // ---- introspection ---------------------------------------------------

    /// Pool statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Memory manager statistics snapshot.
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Host system snapshot.
    pub fn system_info(&self) -> SystemInfo {
        self.monitor.snapshot()
    }

    /// The controller's current recommendation snapshot.
    pub fn recommendations(&self) -> Arc<Recommendation> {
        self.controller.get_recommendations()
    }

    /// Retained metrics samples, oldest first.
    pub fn metrics_history(&self) -> Vec<MetricsSample> {
        self.controller.metrics_history()
    }

    /// The detected workload pattern.
    pub fn detected_pattern(&self) -> WorkloadPattern {
        self.controller.detected_pattern()
    }

    /// All runtime metrics in the Prometheus text format.
    pub fn export_metrics(&self) -> String {
        metrics::export_metrics()
    }

    /// Health classification with reasons.
    pub fn health(&self) -> HealthReport {
        let stats = self.pool.stats();
        let memory_usage_percent = self.monitor.memory_percent();
        let memory_stats = self.memory.stats();
        let queue_capacity = self.pool.queue_capacity();

        let mut reasons = Vec::new();
        let mut status = HealthStatus::Healthy;

        if memory_stats.under_pressure {
            status = HealthStatus::Critical;
            reasons.push(format!(
                "memory usage {memory_usage_percent:.1}% above critical threshold {}%",
                memory_stats.critical_threshold_percent
            ));
        }
        if stats.worker_threads == 0 {
            status = HealthStatus::Critical;
            reasons.push("no live worker threads".to_string());
        }
        if status == HealthStatus::Healthy {
            if memory_usage_percent > memory_stats.warning_threshold_percent as f64 {
                status = HealthStatus::Degraded;
                reasons.push(format!(
                    "memory usage {memory_usage_percent:.1}% above warning threshold {}%",
                    memory_stats.warning_threshold_percent
                ));
            }
            if stats.pending_jobs > queue_capacity / 2 {
                status = HealthStatus::Degraded;
                reasons.push(format!(
                    "queue depth {} above half capacity {}",
                    stats.pending_jobs, queue_capacity
                ));
            }
        }

        HealthReport {
            status,
            worker_threads: stats.worker_threads,
            active_jobs: stats.active_jobs,
            queue_depth: stats.pending_jobs,
            queue_capacity,
            memory_usage_percent,
            reasons,
        }
    }

    // ---- tuning and lifecycle -------------------------------------------

    /// Resizes the pool (workers >= 1).
    pub fn set_worker_count(&self, workers: usize) -> Result<(), TaskletError> {
        self.pool.set_worker_count(workers)
    }

    /// Sets the controller's sensitivity strategy.
    pub fn set_strategy(&self, strategy: Strategy) {
        self.controller.set_strategy(strategy);
    }

    /// Enables or disables the adaptive apply path.
    pub fn set_adaptive(&self, enabled: bool) {
        self.controller.set_enabled(enabled);
    }

    /// Runs an immediate analysis pass.
    pub fn force_analysis(&self) {
        self.controller.force_analysis();
    }

    /// Applies the current recommendation through the registered adjustment
    /// callbacks. No-op when the adaptive path is disabled.
    pub fn apply_recommendations(&self) {
        self.controller.apply_recommendations();
    }

    /// Synchronously reaps pending-cleanup tasklets; returns the count.
    pub fn force_cleanup(&self) -> usize {
        self.memory.force_cleanup()
    }

    /// Registers a lifecycle event listener (delivered on the host loop).
    ///
    /// Listeners observe `Shutdown` (once) and `RecommendationApplied`
    /// (whenever the adaptive apply path changes configuration).
    pub fn on_event(&self, listener: impl Fn(&RuntimeEvent) + Send + 'static) {
        self.host.add_listener(listener);
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shuts the runtime down.
    ///
    /// Two-phase: submissions stop immediately; workers drain the queue for
    /// up to `grace`, after which remaining pending jobs fail with
    /// `PoolShutdown`. Idempotent: repeated calls return immediately after
    /// the first completes. Emits a single `Shutdown` event.
    ///
    /// Blocks on thread joins; from async code, call it via
    /// `tokio::task::spawn_blocking`.
    pub fn shutdown(&self, grace: Duration) {
        let already_started = self.shutdown_started.swap(true, Ordering::SeqCst);

        self.pool.begin_shutdown();
        self.pool.await_shutdown(grace);

        if !already_started {
            self.controller.stop();
            self.memory.stop_cleanup_task();
            self.host.emit_shutdown();
            self.host.stop();
            info!("Runtime shutdown complete");
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.shutdown_started.load(Ordering::SeqCst) {
            self.shutdown(Duration::from_millis(100));
        }
    }
}

/// The apply path: translate a recommendation into component adjustments.
///
/// Returns whether the configuration actually changed (a scale was applied
/// or the memory thresholds moved); routine cadence tuning does not count.
fn apply_recommendation(
    rec: &Recommendation,
    pool: &Weak<ThreadPool>,
    memory: &Weak<MemoryManager>,
    min_workers: usize,
) -> bool {
    let (Some(pool), Some(memory)) = (pool.upgrade(), memory.upgrade()) else {
        return false;
    };

    let mut changed = false;
    if rec.should_scale_up || rec.should_scale_down {
        let target = rec.worker_count.max(min_workers);
        match pool.set_worker_count(target) {
            Ok(()) => {
                changed = true;
                info!(
                    workers = target,
                    pattern = %rec.pattern,
                    confidence = rec.worker_confidence,
                    "Applied worker recommendation"
                );
            }
            Err(err) => warn!(error = %err, "Worker recommendation rejected"),
        }
    }

    memory.set_cleanup_interval_ms(rec.cleanup_interval_ms);
    memory.set_max_pool_size(rec.pool_max_size);
    if rec.should_adjust_memory {
        let critical = u64::from(rec.memory_limit_percent);
        memory.set_thresholds(critical.saturating_sub(15), critical);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{from_fn, WorkContext};

    fn runtime() -> Runtime {
        Runtime::with_config(
            Config::new()
                .with_workers(2)
                .with_logging(crate::config::LogLevel::Off),
        )
        .expect("runtime")
    }

    #[test]
    fn test_spawn_join_roundtrip() {
        let rt = runtime();
        let id = rt
            .spawn(from_fn(|| Ok::<_, String>("7".to_string())))
            .expect("spawn");
        let outcome = rt.join(id).expect("join");
        assert_eq!(outcome.result_string(), Some("7".to_string()));
        assert_eq!(rt.get_result(id).expect("result"), Some("7".to_string()));
        assert!(!rt.has_error(id).expect("has_error"));
        assert_eq!(rt.get_status(id).expect("status"), JobState::Completed);
        rt.shutdown(Duration::from_millis(500));
    }

    #[test]
    fn test_get_error_surface() {
        let rt = runtime();
        let id = rt
            .spawn(|_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                Err("nope".to_string())
            })
            .expect("spawn");
        rt.join(id).expect("join");
        assert!(rt.has_error(id).expect("has_error"));
        assert!(rt.get_error(id).expect("error").unwrap().contains("nope"));
        assert!(rt.get_result(id).expect("result").is_none());
        rt.shutdown(Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_id_is_error() {
        let rt = runtime();
        assert!(matches!(
            rt.get_status(424242),
            Err(TaskletError::UnknownId(424242))
        ));
        rt.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_spawn_many_assigns_distinct_ids() {
        let rt = runtime();
        let ids = rt
            .spawn_many(10, |index| {
                Box::new(move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
                    Ok(index.to_string().into_bytes())
                })
            })
            .expect("spawn_many");
        assert_eq!(ids.len(), 10);
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 10);

        let outcomes = rt.join_many(&ids).expect("join_many");
        for (index, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.result_string(), Some(index.to_string()));
        }
        rt.shutdown(Duration::from_millis(500));
    }

    #[test]
    fn test_apply_recommendation_scales_pool() {
        let rt = runtime();

        // Routine tuning with no flags raised does not count as a change.
        let rec = Recommendation::default();
        assert!(!apply_recommendation(
            &rec,
            &Arc::downgrade(&rt.pool),
            &Arc::downgrade(&rt.memory),
            1,
        ));

        let mut rec = Recommendation::default();
        rec.should_scale_up = true;
        rec.worker_count = 3;
        assert!(apply_recommendation(
            &rec,
            &Arc::downgrade(&rt.pool),
            &Arc::downgrade(&rt.memory),
            1,
        ));

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while rt.stats().worker_threads != 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(rt.stats().worker_threads, 3);
        rt.shutdown(Duration::from_millis(500));
    }

    #[test]
    fn test_health_is_reported() {
        let rt = runtime();
        let health = rt.health();
        assert!(health.worker_threads > 0 || health.status != HealthStatus::Healthy);
        assert!(health.queue_capacity > 0);
        rt.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn test_introspection_surfaces() {
        let rt = runtime();
        let info = rt.system_info();
        assert!(info.cpu_cores > 0);

        rt.force_analysis();
        let rec = rt.recommendations();
        assert!(rec.invariants_hold());

        let text = rt.export_metrics();
        assert!(text.contains("tasklets_"));
        rt.shutdown(Duration::from_millis(100));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_resolves_payload() {
        let rt = runtime();
        let payload = rt
            .run(from_fn(|| Ok::<_, String>("hello".to_string())))
            .await
            .expect("run");
        assert_eq!(payload, b"hello");
        tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
            .await
            .expect("shutdown task");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retry_eventually_succeeds() {
        let rt = runtime();
        let failures_left = Arc::new(AtomicUsize::new(2));

        let counter = Arc::clone(&failures_left);
        let payload = rt
            .retry(
                move || {
                    let counter = Arc::clone(&counter);
                    Box::new(move |_ctx: &WorkContext| {
                        if counter.load(Ordering::SeqCst) == 0 {
                            Ok(b"recovered".to_vec())
                        } else {
                            counter.fetch_sub(1, Ordering::SeqCst);
                            Err("transient".to_string())
                        }
                    })
                },
                RetryPolicy::new(5).with_delay_ms(5),
            )
            .await
            .expect("retry should eventually succeed");
        assert_eq!(payload, b"recovered");
        tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
            .await
            .expect("shutdown task");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_retry_gives_up_with_last_error() {
        let rt = runtime();
        let result = rt
            .retry(
                || Box::new(|_ctx: &WorkContext| Err::<Vec<u8>, _>("always".to_string())),
                RetryPolicy::new(3).with_delay_ms(1),
            )
            .await;
        assert_eq!(result, Err(TaskletError::UserError("always".to_string())));
        tokio::task::spawn_blocking(move || rt.shutdown(Duration::from_millis(500)))
            .await
            .expect("shutdown task");
    }
}
