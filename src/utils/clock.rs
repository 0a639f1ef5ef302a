//! Monotonic process clock.
//!
//! Job timing fields (`enqueue_time`, `start_time`, `completion_time`) are
//! recorded as nanoseconds elapsed since process start so they can be stored
//! as plain `u64` values, compared across threads, and serialized without
//! carrying `Instant` handles around.
//!
//! A value of `0` means "unset"; the clock therefore never returns `0`.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Returns monotonic nanoseconds elapsed since process start.
///
/// The anchor is initialized on first use. The returned value is always
/// at least 1 so that `0` remains a reliable "unset" marker for timestamps.
pub fn monotonic_nanos() -> u64 {
    let start = PROCESS_START.get_or_init(Instant::now);
    (start.elapsed().as_nanos() as u64).max(1)
}

/// Returns monotonic milliseconds elapsed since process start.
pub fn monotonic_millis() -> u64 {
    monotonic_nanos() / 1_000_000
}

/// Converts a nanosecond timestamp difference to fractional milliseconds.
pub fn nanos_to_millis(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}
