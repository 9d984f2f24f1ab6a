// Core types for the nbplayer bridge: playback state machine, per-player
// controller, event delivery and the player registry

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod registry;
pub mod state;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export commonly used types
pub use config::{ConfigError, PlayerConfig};
pub use controller::{Command, PlaybackController};
pub use engine::{EngineEvent, EngineFactory, EngineListener, EngineOption, MediaEngine, OptionCategory, OptionValue};
pub use error::{EngineError, PlayerError, Result};
pub use notifier::{Dispatcher, EventNotifier, EventSink, StateChangeEvent};
pub use registry::Registry;
pub use state::{Operation, PausePolicy, PlayerState};
