//! Adaptive controller: metrics, classification, recommendations.
//!
//! This module observes the runtime and suggests tuning:
//!
//! - **MetricsSample / MetricsHistory**: periodic observations in a bounded
//!   ring buffer
//! - **WorkloadPattern / JobComplexity / Strategy**: classification types
//! - **Recommendation**: the atomically published output
//! - **AdaptiveController**: the sampler, classifier, and apply path

pub mod controller;
pub mod pattern;
pub mod recommendation;
pub mod sample;

pub use controller::{AdaptiveController, AdaptiveControllerConfig, StatsSource};
pub use pattern::{JobComplexity, Strategy, WorkloadPattern};
pub use recommendation::Recommendation;
pub use sample::{MetricsHistory, MetricsSample, DEFAULT_HISTORY_CAPACITY};
