// Playback state machine: player states, caller operations and the transition table

use crate::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player state
///
/// The discriminants are the wire codes carried by state-change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PlayerState {
    /// No data source (fresh player, or after reset)
    Idle = 0,
    /// Data source set, engine created
    Initialized = 1,
    /// prepare_async submitted, waiting for the engine
    Preparing = 2,
    /// Engine reported prepared
    Prepared = 3,
    /// Playback running
    Started = 4,
    /// Playback paused
    Paused = 5,
    /// Engine reached end of stream
    Completed = 6,
    /// Playback stopped
    Stopped = 7,
    /// Engine or bridge failure; only reset/release leave it
    Error = 8,
    /// Released, terminal
    End = 9,
}

impl PlayerState {
    pub const ALL: [PlayerState; 10] = [
        PlayerState::Idle,
        PlayerState::Initialized,
        PlayerState::Preparing,
        PlayerState::Prepared,
        PlayerState::Started,
        PlayerState::Paused,
        PlayerState::Completed,
        PlayerState::Stopped,
        PlayerState::Error,
        PlayerState::End,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.code() == code)
    }

    /// States from which `start` and `pause` are accepted.
    pub fn is_playable(self) -> bool {
        matches!(
            self,
            PlayerState::Prepared | PlayerState::Started | PlayerState::Paused | PlayerState::Completed
        )
    }

    /// Whether an engine instance must be attached in this state.
    pub fn requires_engine(self) -> bool {
        !matches!(self, PlayerState::Idle | PlayerState::End)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Caller-issued operations on a single player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SetDataSource,
    PrepareAsync,
    StartFromInitialized,
    Start,
    Pause,
    Stop,
    Reset,
    Release,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::SetDataSource,
        Operation::PrepareAsync,
        Operation::StartFromInitialized,
        Operation::Start,
        Operation::Pause,
        Operation::Stop,
        Operation::Reset,
        Operation::Release,
    ];

    /// Method name used on the per-player channel.
    pub fn method_name(self) -> &'static str {
        match self {
            Operation::SetDataSource => "setDataSource",
            Operation::PrepareAsync => "prepareAsync",
            Operation::StartFromInitialized => "startFromInitialized",
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Stop => "stop",
            Operation::Reset => "reset",
            Operation::Release => "release",
        }
    }

    pub fn from_method_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.method_name() == name)
    }

    /// Whether the transition table accepts this operation from `state`.
    pub fn is_valid_from(self, state: PlayerState) -> bool {
        use PlayerState::*;
        match self {
            Operation::SetDataSource => matches!(state, Idle | Initialized),
            Operation::PrepareAsync | Operation::StartFromInitialized => state == Initialized,
            Operation::Start | Operation::Pause => state.is_playable(),
            Operation::Stop => !matches!(state, Idle | Initialized | End),
            Operation::Reset => state != End,
            Operation::Release => true,
        }
    }

    /// State the player ends up in after the operation succeeds from `current`.
    pub fn target_state(self, current: PlayerState) -> PlayerState {
        match self {
            Operation::SetDataSource => PlayerState::Initialized,
            Operation::PrepareAsync | Operation::StartFromInitialized => PlayerState::Preparing,
            Operation::Start => PlayerState::Started,
            Operation::Pause => current,
            Operation::Stop => PlayerState::Stopped,
            Operation::Reset => PlayerState::Idle,
            Operation::Release => PlayerState::End,
        }
    }

    /// Check the operation against the table and return its target state.
    pub fn validate(self, current: PlayerState) -> Result<PlayerState> {
        if self.is_valid_from(current) {
            Ok(self.target_state(current))
        } else {
            Err(PlayerError::InvalidState {
                operation: self,
                state: current,
            })
        }
    }

    /// Engine failures during these operations move the player to Error.
    pub fn fails_into_error(self) -> bool {
        !matches!(self, Operation::Reset | Operation::Release)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// Gate used by `pause`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PausePolicy {
    /// Same playable set as `start`
    #[default]
    Playable,
    /// Only while the engine reports it is playing
    Playing,
}
