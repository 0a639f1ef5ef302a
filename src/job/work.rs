//! The work capability executed by a job.
//!
//! The core never inspects user payloads: work consumes nothing and produces
//! an opaque byte string or an error text. Marshalling of host-language
//! arguments and return values is the binding layer's responsibility.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Execution context handed to running work.
///
/// Exposes the cooperative cancellation flag. The runtime never interrupts
/// running work; long-running jobs may poll `is_cancelled` and bail early.
#[derive(Debug, Clone)]
pub struct WorkContext {
    cancel_flag: Arc<AtomicBool>,
}

impl WorkContext {
    /// Creates a context observing the given cancel flag.
    pub(crate) fn new(cancel_flag: Arc<AtomicBool>) -> Self {
        Self { cancel_flag }
    }

    /// Returns whether cancellation has been requested for this job.
    ///
    /// Best-effort: the flag is set by `cancel()` calls that arrive after the
    /// job started running. Work is free to ignore it.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Acquire)
    }
}

/// A unit of user-supplied work.
///
/// Implementations must be `Send` so they can travel to a worker thread.
/// Returning `Err` marks the job `Failed` with a `UserError` outcome; the
/// error never unwinds across the worker boundary.
pub trait Work: Send + 'static {
    /// Executes the work, producing a string-encoded result or an error text.
    fn execute(&mut self, ctx: &WorkContext) -> Result<Vec<u8>, String>;
}

impl<F> Work for F
where
    F: FnMut(&WorkContext) -> Result<Vec<u8>, String> + Send + 'static,
{
    fn execute(&mut self, ctx: &WorkContext) -> Result<Vec<u8>, String> {
        self(ctx)
    }
}

/// Adapts a plain closure that ignores the context and produces a string.
///
/// Convenient for hosts whose work does not observe cancellation:
///
/// ```
/// use tasklets::job::from_fn;
///
/// let mut work = from_fn(|| Ok::<_, String>("42".to_string()));
/// ```
pub fn from_fn<F, T, E>(mut f: F) -> impl Work
where
    F: FnMut() -> Result<T, E> + Send + 'static,
    T: Into<Vec<u8>>,
    E: Into<String>,
{
    move |_ctx: &WorkContext| -> Result<Vec<u8>, String> {
        f().map(Into::into).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_work() {
        let mut work = |_ctx: &WorkContext| -> Result<Vec<u8>, String> { Ok(b"hello".to_vec()) };
        let ctx = WorkContext::new(Arc::new(AtomicBool::new(false)));
        assert_eq!(work.execute(&ctx), Ok(b"hello".to_vec()));
    }

    #[test]
    fn test_from_fn_maps_types() {
        let mut work = from_fn(|| Ok::<_, String>("42".to_string()));
        let ctx = WorkContext::new(Arc::new(AtomicBool::new(false)));
        assert_eq!(work.execute(&ctx), Ok(b"42".to_vec()));

        let mut failing = from_fn(|| Err::<String, _>("boom"));
        assert_eq!(failing.execute(&ctx), Err("boom".to_string()));
    }

    #[test]
    fn test_context_observes_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = WorkContext::new(Arc::clone(&flag));
        assert!(!ctx.is_cancelled());

        flag.store(true, Ordering::Release);
        assert!(ctx.is_cancelled());
    }
}
