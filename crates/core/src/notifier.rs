// State-change notification: per-player sink slot plus the process-wide delivery thread
//
// Engine callbacks arrive on arbitrary engine threads. Observers only ever see
// events from the single dispatcher thread, in the order transitions happened.

use crate::state::PlayerState;
use crossbeam_channel::{bounded, unbounded, Sender};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// One state transition as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub old_state: PlayerState,
    pub new_state: PlayerState,
}

/// Event sink trait
/// Implementations should return quickly; they run on the shared dispatcher thread
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: StateChangeEvent);
}

type Job = Box<dyn FnOnce() + Send + 'static>;

static GLOBAL_DISPATCHER: Lazy<Arc<Dispatcher>> = Lazy::new(|| Arc::new(Dispatcher::new("nbplayer-events")));

/// Single delivery thread fed by a FIFO queue of closures
pub struct Dispatcher {
    tx: Sender<Job>,
    worker: Option<ThreadId>,
}

impl Dispatcher {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = unbounded::<Job>();
        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            log::debug!("Dispatcher thread started");
            while let Ok(job) = rx.recv() {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("Event sink panicked; event dropped");
                }
            }
            log::debug!("Dispatcher thread stopping");
        });

        let worker = match worker {
            Ok(handle) => Some(handle.thread().id()),
            Err(e) => {
                log::error!("Failed to spawn dispatcher thread {}: {}", name, e);
                None
            }
        };

        Self { tx, worker }
    }

    /// Process-wide dispatcher shared by every player.
    pub fn global() -> Arc<Dispatcher> {
        GLOBAL_DISPATCHER.clone()
    }

    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            log::warn!("Dispatcher is gone; notification dropped");
        }
    }

    /// Block until every job queued before this call has run.
    ///
    /// Returns immediately when called from the dispatcher thread itself.
    pub fn flush(&self) {
        if self.worker.is_none() || self.worker == Some(thread::current().id()) {
            return;
        }
        let (done_tx, done_rx) = bounded::<()>(1);
        self.post(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

/// Per-player optional sink
///
/// `emit` with no sink attached is a no-op: nothing is buffered or replayed.
#[derive(Clone)]
pub struct EventNotifier {
    sink: Arc<Mutex<Option<Arc<dyn EventSink>>>>,
    dispatcher: Arc<Dispatcher>,
}

impl EventNotifier {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(None)),
            dispatcher,
        }
    }

    /// Attach a sink, replacing any previous one.
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn detach(&self) {
        self.sink.lock().take();
    }

    /// Detach once every notification already queued has been delivered.
    pub fn close(&self) {
        let slot = self.sink.clone();
        self.dispatcher.post(move || {
            slot.lock().take();
        });
    }

    pub fn is_attached(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn emit(&self, event: StateChangeEvent) {
        if !self.is_attached() {
            return;
        }
        let slot = self.sink.clone();
        self.dispatcher.post(move || {
            // Re-read at delivery: a detach issued after emit wins
            let sink = slot.lock().clone();
            if let Some(sink) = sink {
                sink.on_event(event);
            }
        });
    }
}
