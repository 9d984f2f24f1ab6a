// Error handling for the player bridge

use crate::state::{Operation, PlayerState};
use thiserror::Error;

/// Failure reported by a media engine implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Engine instance could not be created
    #[error("engine creation failed: {0}")]
    Create(String),

    /// Engine rejected or failed the call
    #[error("engine call failed: {0}")]
    Call(String),

    /// Engine backend is gone (native library unloaded, JVM detached)
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Player bridge error types
///
/// Every variant is reported to the caller as a structured error; none of them
/// escapes the operation boundary as a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// Missing or malformed input (empty player id, empty url)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation not legal in the current state
    #[error("{operation} called in invalid state: {state}")]
    InvalidState {
        operation: Operation,
        state: PlayerState,
    },

    /// The underlying engine call failed
    #[error("{operation} failed: {message}")]
    EngineFailure { operation: Operation, message: String },

    /// Unknown player handle
    #[error("player not found: {0}")]
    NotFound(String),
}

impl PlayerError {
    pub(crate) fn engine(operation: Operation, err: EngineError) -> Self {
        PlayerError::EngineFailure {
            operation,
            message: err.to_string(),
        }
    }

    /// Error code reported on the method channel.
    pub fn code(&self) -> &'static str {
        match self {
            PlayerError::InvalidArgument(_) => "INVALID_ARGUMENT",
            PlayerError::InvalidState { .. } => "INVALID_STATE",
            PlayerError::NotFound(_) => "NOT_FOUND",
            PlayerError::EngineFailure { operation, .. } => match operation {
                Operation::SetDataSource => "SET_DATA_SOURCE_ERROR",
                Operation::PrepareAsync => "PREPARE_ERROR",
                Operation::StartFromInitialized => "START_FROM_INITIALIZED_ERROR",
                Operation::Start => "START_ERROR",
                Operation::Pause => "PAUSE_ERROR",
                Operation::Stop => "STOP_ERROR",
                Operation::Reset => "RESET_ERROR",
                Operation::Release => "RELEASE_ERROR",
            },
        }
    }
}

/// Result type alias for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;
