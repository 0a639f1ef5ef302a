//! The pooled per-job state container.
//!
//! A `JobDescriptor` is owned by exactly one party at a time: the submitter
//! fills it, the queue carries it, a worker executes it, and the memory
//! manager takes it back for reuse. Shared visibility (joins, cancellation)
//! goes through the job's `Tasklet` handle instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TaskletError;
use crate::job::work::Work;
use crate::utils::clock::nanos_to_millis;

/// Process-unique job identifier, assigned monotonically at acquire time.
pub type JobId = u64;

/// Callback invoked on the host loop exactly once per job, after the
/// terminal state is visible.
pub type CompletionCallback = Box<dyn FnOnce(JobId, &Outcome) + Send>;

/// State of a job. Transitions are one-way:
/// `Pending -> Running -> {Completed, Failed}`, and `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted, waiting in the queue.
    Pending,
    /// Dequeued by a worker and executing.
    Running,
    /// Work returned a result.
    Completed,
    /// Work returned an error, timed out before dequeue, or was drained
    /// by shutdown.
    Failed,
    /// Cancelled while still pending.
    Cancelled,
}

impl JobState {
    /// Returns whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of a job.
///
/// The state tag derived from the variant is authoritative; callers should
/// inspect it before reading the payload or error.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The work produced a string-encoded result.
    Success(Vec<u8>),
    /// The work failed; the error kind says how.
    Failure(TaskletError),
    /// The job was cancelled before it ran.
    Cancelled,
}

impl Outcome {
    /// Returns the terminal state this outcome corresponds to.
    pub fn state(&self) -> JobState {
        match self {
            Outcome::Success(_) => JobState::Completed,
            Outcome::Failure(_) => JobState::Failed,
            Outcome::Cancelled => JobState::Cancelled,
        }
    }

    /// Returns whether the job completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Returns the success payload, if any.
    pub fn result_bytes(&self) -> Option<&[u8]> {
        match self {
            Outcome::Success(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the success payload decoded as UTF-8, if any.
    pub fn result_string(&self) -> Option<String> {
        self.result_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Returns the error text, if any.
    pub fn error_text(&self) -> Option<String> {
        match self {
            Outcome::Failure(err) => Some(err.to_string()),
            Outcome::Cancelled => Some(TaskletError::Cancelled.to_string()),
            Outcome::Success(_) => None,
        }
    }

    /// Converts into a `Result`, mapping cancellation to its error kind.
    pub fn into_result(self) -> Result<Vec<u8>, TaskletError> {
        match self {
            Outcome::Success(bytes) => Ok(bytes),
            Outcome::Failure(err) => Err(err),
            Outcome::Cancelled => Err(TaskletError::Cancelled),
        }
    }
}

/// Per-submission options.
///
/// Higher priority dequeues earlier; within a priority class jobs dequeue
/// in submission order. A timeout of 0 means the job never times out.
#[derive(Default)]
pub struct JobOptions {
    /// Scheduling priority. Negative values are valid (lower than normal).
    pub priority: i32,
    /// Per-job timeout override in milliseconds; `None` uses the configured
    /// default, `Some(0)` disables the timeout.
    pub timeout_ms: Option<u64>,
    /// Completion callback, invoked on the host loop.
    pub on_complete: Option<CompletionCallback>,
}

impl JobOptions {
    /// Creates options with defaults (priority 0, configured timeout).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scheduling priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the per-job timeout in milliseconds (0 disables).
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the completion callback.
    pub fn with_callback(
        mut self,
        callback: impl FnOnce(JobId, &Outcome) + Send + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOptions")
            .field("priority", &self.priority)
            .field("timeout_ms", &self.timeout_ms)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// The atomic unit of scheduled work.
///
/// Timing fields are monotonic nanoseconds since process start; `0` means
/// unset. `execution_duration` is nonzero only for jobs that actually ran
/// to a `Completed` or `Failed` state.
pub struct JobDescriptor {
    id: JobId,
    priority: i32,
    timeout_ms: u64,
    enqueue_time: u64,
    start_time: u64,
    completion_time: u64,
    state: JobState,
    work: Option<Box<dyn Work>>,
    on_complete: Option<CompletionCallback>,
    result: Option<Vec<u8>>,
    error: Option<String>,
}

impl JobDescriptor {
    /// Creates a blank descriptor. Ids are assigned by the pool at acquire.
    pub(crate) fn blank() -> Self {
        Self {
            id: 0,
            priority: 0,
            timeout_ms: 0,
            enqueue_time: 0,
            start_time: 0,
            completion_time: 0,
            state: JobState::Pending,
            work: None,
            on_complete: None,
            result: None,
            error: None,
        }
    }

    /// Restores the acquired-blank state so the descriptor can be reused.
    pub(crate) fn reset(&mut self) {
        self.id = 0;
        self.priority = 0;
        self.timeout_ms = 0;
        self.enqueue_time = 0;
        self.start_time = 0;
        self.completion_time = 0;
        self.state = JobState::Pending;
        self.work = None;
        self.on_complete = None;
        self.result = None;
        self.error = None;
    }

    /// Assigns the process-unique id. Called once per acquire.
    pub(crate) fn assign_id(&mut self, id: JobId) {
        self.id = id;
    }

    /// Fills the descriptor for submission and stamps the enqueue time.
    pub(crate) fn prepare(
        &mut self,
        work: Box<dyn Work>,
        priority: i32,
        timeout_ms: u64,
        on_complete: Option<CompletionCallback>,
        enqueue_time: u64,
    ) {
        self.priority = priority;
        self.timeout_ms = timeout_ms;
        self.enqueue_time = enqueue_time;
        self.state = JobState::Pending;
        self.work = Some(work);
        self.on_complete = on_complete;
    }

    /// Returns the job id.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Returns the scheduling priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the timeout in milliseconds (0 = none).
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Returns the current state.
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Returns the enqueue timestamp (monotonic nanos, 0 = unset).
    pub fn enqueue_time(&self) -> u64 {
        self.enqueue_time
    }

    /// Returns the execution start timestamp (monotonic nanos, 0 = unset).
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// Returns the completion timestamp (monotonic nanos, 0 = unset).
    pub fn completion_time(&self) -> u64 {
        self.completion_time
    }

    /// Takes the work for execution. The descriptor keeps everything else.
    pub(crate) fn take_work(&mut self) -> Option<Box<dyn Work>> {
        self.work.take()
    }

    /// Takes the completion callback for dispatch to the host loop.
    pub(crate) fn take_callback(&mut self) -> Option<CompletionCallback> {
        self.on_complete.take()
    }

    /// Marks the job running and stamps the start time.
    pub(crate) fn mark_running(&mut self, now: u64) {
        debug_assert_eq!(self.state, JobState::Pending);
        self.state = JobState::Running;
        self.start_time = now;
    }

    /// Marks the job completed with a result, stamping the completion time.
    pub(crate) fn mark_completed(&mut self, result: Vec<u8>, now: u64) {
        self.state = JobState::Completed;
        self.result = Some(result);
        self.completion_time = now;
    }

    /// Marks the job failed with an error text, stamping the completion time.
    pub(crate) fn mark_failed(&mut self, error: String, now: u64) {
        self.state = JobState::Failed;
        self.error = Some(error);
        self.completion_time = now;
    }

    /// Marks the job cancelled. Cancelled jobs never ran, so no completion
    /// stamp is recorded and `execution_duration` stays zero.
    pub(crate) fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
        self.error = Some(TaskletError::Cancelled.to_string());
    }

    /// Time spent waiting in the queue, in milliseconds.
    pub fn queue_wait_ms(&self) -> f64 {
        if self.start_time == 0 || self.enqueue_time == 0 {
            return 0.0;
        }
        nanos_to_millis(self.start_time.saturating_sub(self.enqueue_time))
    }

    /// Time spent executing, in milliseconds. Nonzero only for jobs that
    /// reached `Completed` or `Failed` through a worker.
    pub fn execution_ms(&self) -> f64 {
        if self.completion_time == 0 || self.start_time == 0 {
            return 0.0;
        }
        nanos_to_millis(self.completion_time.saturating_sub(self.start_time))
    }

    /// Total time from enqueue to completion, in milliseconds.
    pub fn total_ms(&self) -> f64 {
        if self.completion_time == 0 || self.enqueue_time == 0 {
            return 0.0;
        }
        nanos_to_millis(self.completion_time.saturating_sub(self.enqueue_time))
    }

    /// Returns whether the pre-dequeue deadline has elapsed at `now`.
    pub(crate) fn deadline_elapsed(&self, now: u64) -> bool {
        self.timeout_ms > 0
            && self.enqueue_time > 0
            && now.saturating_sub(self.enqueue_time) > self.timeout_ms * 1_000_000
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::monotonic_nanos;

    fn noop_work() -> Box<dyn Work> {
        Box::new(|_ctx: &crate::job::WorkContext| -> Result<Vec<u8>, String> { Ok(Vec::new()) })
    }

    #[test]
    fn test_state_terminality() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", JobState::Pending), "pending");
        assert_eq!(format!("{}", JobState::Cancelled), "cancelled");
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = Outcome::Success(b"42".to_vec());
        assert!(ok.is_success());
        assert_eq!(ok.state(), JobState::Completed);
        assert_eq!(ok.result_string(), Some("42".to_string()));
        assert!(ok.error_text().is_none());

        let err = Outcome::Failure(TaskletError::UserError("boom".to_string()));
        assert!(!err.is_success());
        assert_eq!(err.state(), JobState::Failed);
        assert!(err.error_text().unwrap().contains("boom"));

        let cancelled = Outcome::Cancelled;
        assert_eq!(cancelled.state(), JobState::Cancelled);
        assert_eq!(cancelled.into_result(), Err(TaskletError::Cancelled));
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let mut d = JobDescriptor::blank();
        d.assign_id(7);
        let t0 = monotonic_nanos();
        d.prepare(noop_work(), 0, 0, None, t0);
        assert_eq!(d.state(), JobState::Pending);
        assert_eq!(d.id(), 7);

        let t1 = t0 + 2_000_000;
        d.mark_running(t1);
        assert_eq!(d.state(), JobState::Running);

        let t2 = t1 + 5_000_000;
        d.mark_completed(b"done".to_vec(), t2);
        assert_eq!(d.state(), JobState::Completed);
        assert!((d.queue_wait_ms() - 2.0).abs() < 1e-9);
        assert!((d.execution_ms() - 5.0).abs() < 1e-9);
        assert!((d.total_ms() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancelled_has_no_execution_duration() {
        let mut d = JobDescriptor::blank();
        d.assign_id(1);
        d.prepare(noop_work(), 0, 0, None, monotonic_nanos());
        d.mark_cancelled();
        assert_eq!(d.state(), JobState::Cancelled);
        assert_eq!(d.execution_ms(), 0.0);
    }

    #[test]
    fn test_reset_restores_blank_state() {
        let mut d = JobDescriptor::blank();
        d.assign_id(9);
        d.prepare(noop_work(), 5, 100, None, monotonic_nanos());
        d.mark_running(monotonic_nanos());
        d.mark_failed("oops".to_string(), monotonic_nanos());

        d.reset();
        assert_eq!(d.id(), 0);
        assert_eq!(d.priority(), 0);
        assert_eq!(d.timeout_ms(), 0);
        assert_eq!(d.state(), JobState::Pending);
        assert_eq!(d.enqueue_time(), 0);
        assert!(d.take_work().is_none());
    }

    #[test]
    fn test_deadline_elapsed() {
        let mut d = JobDescriptor::blank();
        d.assign_id(1);
        d.prepare(noop_work(), 0, 50, None, 1_000);
        // 50 ms deadline from enqueue at 1_000 ns.
        assert!(!d.deadline_elapsed(1_000 + 49 * 1_000_000));
        assert!(d.deadline_elapsed(1_000 + 51 * 1_000_000));
    }

    #[test]
    fn test_zero_timeout_never_elapses() {
        let mut d = JobDescriptor::blank();
        d.assign_id(1);
        d.prepare(noop_work(), 0, 0, None, 1_000);
        assert!(!d.deadline_elapsed(u64::MAX));
    }

    #[test]
    fn test_options_builder() {
        let opts = JobOptions::new()
            .with_priority(3)
            .with_timeout_ms(250)
            .with_callback(|_id, _outcome| {});
        assert_eq!(opts.priority, 3);
        assert_eq!(opts.timeout_ms, Some(250));
        assert!(opts.on_complete.is_some());
    }
}
