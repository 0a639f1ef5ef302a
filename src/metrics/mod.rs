//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for the tasklets
//! runtime: job lifecycle counters, duration histograms, and gauges for
//! queue depth, workers, tasklets, and the descriptor pool.
//!
//! # Example
//!
//! ```ignore
//! use tasklets::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // Create a collector for recording metrics
//! let collector = MetricsCollector::new();
//! collector.update_queue_depth(4);
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

// Re-export metric constants for direct access when needed
pub use prometheus::{
    ACTIVE_TASKLETS, ACTIVE_WORKERS, DESCRIPTORS_AVAILABLE, DESCRIPTORS_IN_USE,
    JOBS_FINISHED_TOTAL, JOBS_SUBMITTED_TOTAL, JOB_EXECUTION_SECONDS, JOB_QUEUE_WAIT_SECONDS,
    MEMORY_USAGE_PERCENT, QUEUE_DEPTH, REGISTRY,
};
