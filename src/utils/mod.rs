//! Shared utility functions for tasklets.
//!
//! This module provides common utilities used across multiple modules,
//! currently the monotonic process clock used for all job timing.

pub mod clock;

pub use clock::{monotonic_millis, monotonic_nanos, nanos_to_millis};
