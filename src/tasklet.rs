//! Host-visible handles for submitted jobs.
//!
//! A `Tasklet` is the shared view of one submission: joiners block on its
//! completion latch, cancellation goes through it, and it retains the
//! terminal outcome after the underlying descriptor has been released back
//! to the pool. Handles are registered in the memory manager by id and
//! reaped by the cleanup task once marked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::job::{JobId, JobState, Outcome};

struct TaskletInner {
    state: JobState,
    outcome: Option<Outcome>,
}

/// Shared handle for one submitted job.
///
/// The latch mutex orders the terminal-state write before any joiner reads
/// the outcome, so a joiner observing a terminal state also observes the
/// final result or error.
pub struct Tasklet {
    id: JobId,
    inner: Mutex<TaskletInner>,
    done: Condvar,
    cancel_flag: Arc<AtomicBool>,
}

impl Tasklet {
    /// Creates a pending tasklet for the given job id.
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            inner: Mutex::new(TaskletInner {
                state: JobState::Pending,
                outcome: None,
            }),
            done: Condvar::new(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the job id.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Returns the current state.
    pub fn status(&self) -> JobState {
        self.inner.lock().state
    }

    /// Returns whether the job has reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Returns whether the job is currently executing.
    pub fn is_running(&self) -> bool {
        self.status() == JobState::Running
    }

    /// The cooperative cancellation flag shared with the work context.
    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    /// Transitions `Pending -> Running`.
    ///
    /// Returns `false` if the job is no longer pending (it was cancelled
    /// between the worker's dequeue and this call), in which case the worker
    /// must not execute the work.
    pub(crate) fn mark_running(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != JobState::Pending {
            return false;
        }
        inner.state = JobState::Running;
        true
    }

    /// Records the terminal outcome and wakes all joiners.
    ///
    /// The first terminal transition wins; a second call is ignored so the
    /// cancel/complete race resolves deterministically.
    pub(crate) fn complete(&self, outcome: Outcome) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = outcome.state();
        inner.outcome = Some(outcome);
        drop(inner);
        self.done.notify_all();
        true
    }

    /// Attempts to cancel the job.
    ///
    /// Succeeds only while the job is still pending; the terminal state
    /// becomes `Cancelled` and joiners are woken. For a running job this
    /// only raises the cooperative flag and returns `false`.
    pub(crate) fn cancel(&self) -> bool {
        self.cancel_flag.store(true, Ordering::Release);
        let mut inner = self.inner.lock();
        if inner.state != JobState::Pending {
            return false;
        }
        inner.state = JobState::Cancelled;
        inner.outcome = Some(Outcome::Cancelled);
        drop(inner);
        self.done.notify_all();
        true
    }

    /// Returns the outcome if the job has finished.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.lock().outcome.clone()
    }

    /// Blocks the calling thread until the job reaches a terminal state.
    pub fn wait(&self) -> Outcome {
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            self.done.wait(&mut inner);
        }
        inner
            .outcome
            .clone()
            .unwrap_or(Outcome::Failure(crate::error::TaskletError::Internal(
                "terminal state without outcome".to_string(),
            )))
    }

    /// Like `wait`, giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let mut inner = self.inner.lock();
        while !inner.state.is_terminal() {
            if self.done.wait_for(&mut inner, timeout).timed_out() {
                return inner.outcome.clone();
            }
        }
        inner.outcome.clone()
    }
}

impl std::fmt::Debug for Tasklet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tasklet")
            .field("id", &self.id)
            .field("state", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_new_tasklet_is_pending() {
        let t = Tasklet::new(1);
        assert_eq!(t.id(), 1);
        assert_eq!(t.status(), JobState::Pending);
        assert!(!t.is_finished());
        assert!(t.outcome().is_none());
    }

    #[test]
    fn test_complete_wakes_joiner() {
        let t = Arc::new(Tasklet::new(2));
        let joiner = {
            let t = Arc::clone(&t);
            thread::spawn(move || t.wait())
        };

        assert!(t.mark_running());
        assert!(t.complete(Outcome::Success(b"ok".to_vec())));

        let outcome = joiner.join().expect("joiner thread panicked");
        assert_eq!(outcome.result_string(), Some("ok".to_string()));
        assert_eq!(t.status(), JobState::Completed);
    }

    #[test]
    fn test_cancel_pending_succeeds() {
        let t = Tasklet::new(3);
        assert!(t.cancel());
        assert_eq!(t.status(), JobState::Cancelled);
        assert_eq!(t.outcome(), Some(Outcome::Cancelled));
        // A worker that dequeues it afterwards must not run it.
        assert!(!t.mark_running());
    }

    #[test]
    fn test_cancel_running_is_cooperative_only() {
        let t = Tasklet::new(4);
        assert!(t.mark_running());
        assert!(!t.cancel());
        assert_eq!(t.status(), JobState::Running);
        assert!(t.cancel_flag().load(Ordering::Acquire));
    }

    #[test]
    fn test_first_terminal_transition_wins() {
        let t = Tasklet::new(5);
        assert!(t.cancel());
        assert!(!t.complete(Outcome::Success(Vec::new())));
        assert_eq!(t.status(), JobState::Cancelled);
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let t = Tasklet::new(6);
        assert!(t.wait_timeout(Duration::from_millis(20)).is_none());
    }
}
