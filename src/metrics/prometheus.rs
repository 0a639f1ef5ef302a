//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics published by the tasklets
//! runtime and provides functions for initializing, registering, and
//! exporting them. The crate is a library: metrics are exposed as encodable
//! text via `export_metrics`, with no listener of its own.

use prometheus::{Counter, CounterVec, Encoder, Gauge, Histogram, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all tasklets metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total jobs submitted to the pool.
pub static JOBS_SUBMITTED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Total finished jobs, labeled by terminal state.
pub static JOBS_FINISHED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job execution duration in seconds.
pub static JOB_EXECUTION_SECONDS: OnceLock<Histogram> = OnceLock::new();

/// Job queue wait in seconds.
pub static JOB_QUEUE_WAIT_SECONDS: OnceLock<Histogram> = OnceLock::new();

/// Jobs waiting in the work queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Live worker threads.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Registered tasklet handles.
pub static ACTIVE_TASKLETS: OnceLock<Gauge> = OnceLock::new();

/// Descriptors sitting in the reuse pool.
pub static DESCRIPTORS_AVAILABLE: OnceLock<Gauge> = OnceLock::new();

/// Descriptors currently owned by callers.
pub static DESCRIPTORS_IN_USE: OnceLock<Gauge> = OnceLock::new();

/// System memory usage percent observed by the runtime.
pub static MEMORY_USAGE_PERCENT: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Idempotent: calls after the first return without re-registering.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let jobs_submitted = Counter::new(
        "tasklets_jobs_submitted_total",
        "Total jobs submitted to the pool",
    )?;

    let jobs_finished = CounterVec::new(
        Opts::new(
            "tasklets_jobs_finished_total",
            "Total finished jobs by terminal state",
        ),
        &["state"],
    )?;

    let job_execution = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "tasklets_job_execution_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )?;

    let job_queue_wait = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "tasklets_job_queue_wait_seconds",
            "Job queue wait in seconds",
        )
        .buckets(vec![0.0001, 0.001, 0.01, 0.1, 0.5, 1.0, 5.0]),
    )?;

    let queue_depth = Gauge::new("tasklets_queue_depth", "Jobs waiting in the work queue")?;
    let active_workers = Gauge::new("tasklets_active_workers", "Live worker threads")?;
    let active_tasklets = Gauge::new("tasklets_active_tasklets", "Registered tasklet handles")?;
    let descriptors_available = Gauge::new(
        "tasklets_descriptors_available",
        "Descriptors sitting in the reuse pool",
    )?;
    let descriptors_in_use = Gauge::new(
        "tasklets_descriptors_in_use",
        "Descriptors currently owned by callers",
    )?;
    let memory_usage = Gauge::new(
        "tasklets_memory_usage_percent",
        "System memory usage percent observed by the runtime",
    )?;

    registry.register(Box::new(jobs_submitted.clone()))?;
    registry.register(Box::new(jobs_finished.clone()))?;
    registry.register(Box::new(job_execution.clone()))?;
    registry.register(Box::new(job_queue_wait.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(active_tasklets.clone()))?;
    registry.register(Box::new(descriptors_available.clone()))?;
    registry.register(Box::new(descriptors_in_use.clone()))?;
    registry.register(Box::new(memory_usage.clone()))?;

    // Store metrics in static variables
    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_SUBMITTED_TOTAL.set(jobs_submitted);
    let _ = JOBS_FINISHED_TOTAL.set(jobs_finished);
    let _ = JOB_EXECUTION_SECONDS.set(job_execution);
    let _ = JOB_QUEUE_WAIT_SECONDS.set(job_queue_wait);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = ACTIVE_TASKLETS.set(active_tasklets);
    let _ = DESCRIPTORS_AVAILABLE.set(descriptors_available);
    let _ = DESCRIPTORS_IN_USE.set(descriptors_in_use);
    let _ = MEMORY_USAGE_PERCENT.set(memory_usage);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Gathers all metrics from the registry and encodes them in the text
/// exposition format, suitable for scraping by a Prometheus server.
///
/// # Returns
///
/// A string containing all metrics in Prometheus text format. If the
/// registry has not been initialized or encoding fails, returns a comment
/// line instead.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Failed to encode metrics: {e}\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| "# Metrics encoding was not UTF-8\n".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics().expect("first init");
        init_metrics().expect("second init");
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_contains_metric_names() {
        init_metrics().expect("init");
        if let Some(counter) = JOBS_SUBMITTED_TOTAL.get() {
            counter.inc();
        }
        let text = export_metrics();
        assert!(text.contains("tasklets_jobs_submitted_total"));
        assert!(text.contains("tasklets_queue_depth"));
    }
}
