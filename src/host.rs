//! Host-loop bridge.
//!
//! Completion callbacks must run on a single designated thread (the host
//! loop), never inline on a worker. The core only knows the `HostSignal`
//! capability; a binding layer provides the real event-loop hop. `HostLoop`
//! is the built-in implementation: a dedicated dispatcher thread draining an
//! unbounded channel.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error};

use crate::job::{CompletionCallback, JobId, Outcome};

/// Events hopped from worker threads onto the host loop.
pub enum HostEvent {
    /// A job reached a terminal state; invoke its completion callback.
    JobCompleted {
        /// The finished job.
        id: JobId,
        /// Its terminal outcome.
        outcome: Outcome,
        /// The callback to invoke, if one was registered.
        callback: Option<CompletionCallback>,
    },
    /// A lifecycle notification for registered event listeners.
    Event(RuntimeEvent),
    /// Internal: stop the dispatcher thread.
    Stop,
}

/// Capability the core uses to hop a payload from a worker back to the host.
pub trait HostSignal: Send + Sync {
    /// Delivers an event to the host loop. Must not block the worker.
    fn wake(&self, event: HostEvent);
}

/// Lifecycle notifications delivered to registered listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Emitted exactly once, after the first shutdown completes.
    Shutdown,
    /// Emitted when the adaptive apply path changed the configuration.
    RecommendationApplied,
}

type EventListener = Box<dyn Fn(&RuntimeEvent) + Send>;

/// Built-in host loop: one dispatcher thread invoking callbacks in arrival
/// order. A callback panic is logged; the loop keeps running.
pub struct HostLoop {
    tx: UnboundedSender<HostEvent>,
    handle: Mutex<Option<JoinHandle<()>>>,
    listeners: Arc<Mutex<Vec<EventListener>>>,
}

impl HostLoop {
    /// Starts the dispatcher thread.
    pub fn start() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<HostEvent>();
        let listeners: Arc<Mutex<Vec<EventListener>>> = Arc::new(Mutex::new(Vec::new()));
        let loop_listeners = Arc::clone(&listeners);

        let handle = std::thread::Builder::new()
            .name("tasklets-host-loop".to_string())
            .spawn(move || {
                while let Some(event) = rx.blocking_recv() {
                    match event {
                        HostEvent::JobCompleted {
                            id,
                            outcome,
                            callback,
                        } => {
                            if let Some(callback) = callback {
                                let result =
                                    catch_unwind(AssertUnwindSafe(|| callback(id, &outcome)));
                                if result.is_err() {
                                    error!(job_id = id, "Completion callback panicked");
                                }
                            }
                        }
                        HostEvent::Event(event) => {
                            let listeners = loop_listeners.lock();
                            for listener in listeners.iter() {
                                let result =
                                    catch_unwind(AssertUnwindSafe(|| listener(&event)));
                                if result.is_err() {
                                    error!(event = ?event, "Event listener panicked");
                                }
                            }
                        }
                        HostEvent::Stop => break,
                    }
                }
                debug!("Host loop stopped");
            })
            .expect("failed to spawn host loop thread");

        Arc::new(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            listeners,
        })
    }

    /// Registers a lifecycle event listener.
    pub fn add_listener(&self, listener: impl Fn(&RuntimeEvent) + Send + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    /// Delivers a lifecycle notification to listeners, via the loop thread.
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(HostEvent::Event(event));
    }

    /// Emits the shutdown notification to listeners.
    pub fn emit_shutdown(&self) {
        self.emit(RuntimeEvent::Shutdown);
    }

    /// Stops the dispatcher after draining already queued events.
    pub fn stop(&self) {
        let _ = self.tx.send(HostEvent::Stop);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!("Host loop thread panicked");
            }
        }
    }
}

impl HostSignal for HostLoop {
    fn wake(&self, event: HostEvent) {
        let _ = self.tx.send(event);
    }
}
