//! Error types for tasklets operations.
//!
//! The runtime surfaces one error enum across all subsystems so callers can
//! match on the failure kind regardless of where it originated:
//!
//! - Synchronous failures at the call site (`InvalidArgument`, `UnknownId`,
//!   `MemoryPressure`, `PoolShutdown`)
//! - Terminal job outcomes (`Timeout`, `UserError`, `Cancelled`)
//! - Invariant violations (`Internal`)

use thiserror::Error;

use crate::job::JobId;

/// Errors surfaced by the tasklets runtime.
///
/// The variant is the authoritative failure kind; the payload carries
/// human-readable detail. Errors attached to a job outcome are cloned into
/// the job's tasklet handle, so the enum is `Clone`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskletError {
    /// A caller-supplied option or bound was rejected before enqueue.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The id was never submitted, or its tasklet has already been reaped.
    #[error("Unknown job id {0}")]
    UnknownId(JobId),

    /// The job's timeout elapsed before a worker dequeued it.
    #[error("Job timed out after {timeout_ms} ms before reaching a worker")]
    Timeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The user work returned an error.
    #[error("{0}")]
    UserError(String),

    /// The job was cancelled while pending.
    #[error("Job was cancelled")]
    Cancelled,

    /// System memory is above the critical threshold; submission refused.
    #[error("Memory pressure: system usage {usage_percent:.1}% exceeds critical threshold {critical_percent:.1}%")]
    MemoryPressure {
        /// Observed system memory usage at submit time.
        usage_percent: f64,
        /// Configured critical threshold.
        critical_percent: f64,
    },

    /// Submitted after shutdown began, or drained by the shutdown grace window.
    #[error("Thread pool is shutting down")]
    PoolShutdown,

    /// An internal invariant was violated (worker crash, duplicate
    /// registration, a dropped completion channel).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskletError {
    /// Returns a short stable tag for the failure kind, used in logs and
    /// metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskletError::InvalidArgument(_) => "invalid_argument",
            TaskletError::UnknownId(_) => "unknown_id",
            TaskletError::Timeout { .. } => "timeout",
            TaskletError::UserError(_) => "user_error",
            TaskletError::Cancelled => "cancelled",
            TaskletError::MemoryPressure { .. } => "memory_pressure",
            TaskletError::PoolShutdown => "pool_shutdown",
            TaskletError::Internal(_) => "internal",
        }
    }

    /// Returns whether this error represents a terminal job outcome rather
    /// than a synchronous call-site failure.
    pub fn is_job_outcome(&self) -> bool {
        matches!(
            self,
            TaskletError::Timeout { .. }
                | TaskletError::UserError(_)
                | TaskletError::Cancelled
                | TaskletError::PoolShutdown
                | TaskletError::Internal(_)
        )
    }
}
