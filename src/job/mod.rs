//! Job definitions for the worker pool.
//!
//! This module defines the atomic unit of scheduled work and its contract
//! with the binding layer:
//!
//! - `Work`: the capability a job executes (opaque bytes in, opaque bytes out)
//! - `JobDescriptor`: the pooled per-job state container
//! - `JobOptions`: per-submission knobs (priority, timeout, callback)
//! - `Outcome`: the terminal result visible to the host

pub mod descriptor;
pub mod work;

pub use descriptor::{
    CompletionCallback, JobDescriptor, JobId, JobOptions, JobState, Outcome,
};
pub use work::{from_fn, Work, WorkContext};
