// Recording fakes for tests: an engine factory that logs every call and a sink
// that keeps every event

use crate::engine::{EngineEvent, EngineFactory, EngineListener, EngineOption, MediaEngine, OptionValue};
use crate::error::EngineError;
use crate::notifier::{EventSink, StateChangeEvent};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SetOption(String, OptionValue),
    SetDataSource(String),
    PrepareAsync,
    Start,
    Pause,
    Stop,
    Reset,
    Release,
}

impl EngineCall {
    pub fn name(&self) -> &'static str {
        match self {
            EngineCall::SetOption(..) => "set_option",
            EngineCall::SetDataSource(_) => "set_data_source",
            EngineCall::PrepareAsync => "prepare_async",
            EngineCall::Start => "start",
            EngineCall::Pause => "pause",
            EngineCall::Stop => "stop",
            EngineCall::Reset => "reset",
            EngineCall::Release => "release",
        }
    }
}

#[derive(Default)]
struct Shared {
    calls: Vec<EngineCall>,
    listeners: Vec<EngineListener>,
    failing: HashSet<String>,
    fail_create: bool,
    release_delay: Option<Duration>,
}

/// Engine factory whose engines record calls and never call back on their own
#[derive(Default)]
pub struct RecordingEngineFactory {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.shared.lock().fail_create = fail;
    }

    /// Make every engine fail calls with this name (see [`EngineCall::name`]).
    pub fn fail_call(&self, name: &str) {
        self.shared.lock().failing.insert(name.to_string());
    }

    /// Make every engine block in `release` for `delay`.
    pub fn delay_release(&self, delay: Duration) {
        self.shared.lock().release_delay = Some(delay);
    }

    pub fn clear_failures(&self) {
        let mut shared = self.shared.lock();
        shared.failing.clear();
        shared.fail_create = false;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.lock().calls.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.shared.lock().calls.iter().filter(|c| c.name() == name).count()
    }

    /// Number of engines created so far.
    pub fn created(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    pub fn listener(&self, index: usize) -> Option<EngineListener> {
        self.shared.lock().listeners.get(index).cloned()
    }

    /// Deliver an event from the most recently created engine.
    pub fn fire(&self, event: EngineEvent) {
        let listener = self.shared.lock().listeners.last().cloned();
        if let Some(listener) = listener {
            listener.emit(event);
        }
    }
}

impl EngineFactory for RecordingEngineFactory {
    fn create(&self, player_id: &str, listener: EngineListener) -> Result<Box<dyn MediaEngine>, EngineError> {
        let mut shared = self.shared.lock();
        if shared.fail_create {
            return Err(EngineError::Create(format!("no engine for {}", player_id)));
        }
        shared.listeners.push(listener);
        Ok(Box::new(RecordingEngine {
            shared: self.shared.clone(),
            playing: false,
        }))
    }
}

pub struct RecordingEngine {
    shared: Arc<Mutex<Shared>>,
    playing: bool,
}

impl RecordingEngine {
    fn record(&mut self, call: EngineCall) -> Result<(), EngineError> {
        let mut shared = self.shared.lock();
        let name = call.name();
        shared.calls.push(call);
        if shared.failing.contains(name) {
            return Err(EngineError::Call(format!("{} rejected", name)));
        }
        Ok(())
    }
}

impl MediaEngine for RecordingEngine {
    fn set_option(&mut self, option: &EngineOption) -> Result<(), EngineError> {
        self.record(EngineCall::SetOption(option.name.clone(), option.value.clone()))
    }

    fn set_data_source(&mut self, uri: &str) -> Result<(), EngineError> {
        self.record(EngineCall::SetDataSource(uri.to_string()))
    }

    fn prepare_async(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::PrepareAsync)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::Start)?;
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::Pause)?;
        self.playing = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::Stop)?;
        self.playing = false;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.record(EngineCall::Reset)?;
        self.playing = false;
        Ok(())
    }

    fn release(&mut self) -> Result<(), EngineError> {
        self.playing = false;
        let delay = self.shared.lock().release_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        self.record(EngineCall::Release)
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Sink that keeps every delivered event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StateChangeEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: StateChangeEvent) {
        self.events.lock().push(event);
    }
}
