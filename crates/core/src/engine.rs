// Media engine capability contract
//
// The engine (decoding, demuxing, rendering, network transport) is external.
// The bridge only needs the control surface below plus one callback channel.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// `what` code for video rendering start
pub const MEDIA_INFO_VIDEO_RENDERING_START: i32 = 3;
/// `what` code for audio rendering start
pub const MEDIA_INFO_AUDIO_RENDERING_START: i32 = 10002;

/// Events raised by the engine on its own threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Prepared,
    Completed,
    Error { what: i32, extra: i32 },
    Info { what: i32, extra: i32 },
    SeekComplete,
}

impl EngineEvent {
    pub fn is_rendering_start(&self) -> bool {
        matches!(
            self,
            EngineEvent::Info { what, .. }
                if *what == MEDIA_INFO_VIDEO_RENDERING_START || *what == MEDIA_INFO_AUDIO_RENDERING_START
        )
    }
}

/// Option category understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionCategory {
    Format,
    Codec,
    Player,
}

impl OptionCategory {
    /// Numeric category id used by ijk-style engines.
    pub fn id(self) -> i32 {
        match self {
            OptionCategory::Format => 1,
            OptionCategory::Codec => 2,
            OptionCategory::Player => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Str(v) => f.write_str(v),
        }
    }
}

/// One engine option, applied before the data source is handed over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineOption {
    pub category: OptionCategory,
    pub name: String,
    pub value: OptionValue,
}

impl EngineOption {
    pub fn int(category: OptionCategory, name: &str, value: i64) -> Self {
        Self {
            category,
            name: name.to_string(),
            value: OptionValue::Int(value),
        }
    }
}

/// Player option that makes the engine start by itself once prepared
pub const START_ON_PREPARED: &str = "start-on-prepared";

/// Control surface of an engine instance
///
/// Implementations complete work asynchronously and report back through the
/// [`EngineListener`] they were created with. They must not call the listener
/// synchronously from inside one of these methods: the controller holds the
/// player lock while calling them.
pub trait MediaEngine: Send {
    fn set_option(&mut self, option: &EngineOption) -> Result<(), EngineError>;

    fn set_data_source(&mut self, uri: &str) -> Result<(), EngineError>;

    fn prepare_async(&mut self) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self) -> Result<(), EngineError>;

    fn stop(&mut self) -> Result<(), EngineError>;

    fn reset(&mut self) -> Result<(), EngineError>;

    /// Free native resources. The instance is dropped afterwards.
    fn release(&mut self) -> Result<(), EngineError>;

    fn is_playing(&self) -> bool;
}

/// Creates engine instances, one per data source
pub trait EngineFactory: Send + Sync {
    fn create(&self, player_id: &str, listener: EngineListener) -> Result<Box<dyn MediaEngine>, EngineError>;
}

/// Callback handle given to an engine at creation
///
/// All engine callbacks (prepared, completion, error, info, seek complete)
/// arrive through this single entry point as an [`EngineEvent`].
#[derive(Clone)]
pub struct EngineListener {
    inner: Arc<dyn Fn(EngineEvent) + Send + Sync>,
}

impl EngineListener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    pub fn emit(&self, event: EngineEvent) {
        (self.inner)(event);
    }
}

impl fmt::Debug for EngineListener {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("EngineListener")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_rendering_start_codes() {
        assert!(EngineEvent::Info { what: 3, extra: 0 }.is_rendering_start());
        assert!(EngineEvent::Info { what: 10002, extra: 0 }.is_rendering_start());
        assert!(!EngineEvent::Info { what: 701, extra: 0 }.is_rendering_start());
        assert!(!EngineEvent::Prepared.is_rendering_start());
    }

    #[test]
    fn test_listener_forwards_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = EngineListener::new(move |event| sink.lock().push(event));
        listener.clone().emit(EngineEvent::Prepared);
        listener.emit(EngineEvent::Error { what: 1, extra: -1 });
        assert_eq!(
            *seen.lock(),
            vec![EngineEvent::Prepared, EngineEvent::Error { what: 1, extra: -1 }]
        );
    }

    #[test]
    fn test_option_value_display() {
        assert_eq!(OptionValue::Int(30_000_000).to_string(), "30000000");
        assert_eq!(OptionValue::Str("ijkio".into()).to_string(), "ijkio");
        assert_eq!(OptionCategory::Player.id(), 4);
    }
}
