// Method/event channel payloads exchanged with the UI layer

use nbplayer_core::{PlayerError, PlayerState, StateChangeEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const GLOBAL_CHANNEL: &str = "com.newsbang.nbplayer/global";

pub fn method_channel_name(player_id: &str) -> String {
    format!("com.newsbang.nbplayer/methods_{}", player_id)
}

pub fn event_channel_name(player_id: &str) -> String {
    format!("com.newsbang.nbplayer/events_{}", player_id)
}

/// Incoming method call: a method name plus an argument map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: &str, arguments: Value) -> Self {
        Self {
            method: method.to_string(),
            arguments,
        }
    }

    pub fn without_args(method: &str) -> Self {
        Self::new(method, Value::Null)
    }

    /// String argument by key; missing or non-string values read as `None`.
    pub fn argument_str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Reply to a method call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodResult {
    Success {
        #[serde(default)]
        value: Value,
    },
    Error {
        code: String,
        message: String,
        #[serde(default)]
        details: Value,
    },
    NotImplemented,
}

impl MethodResult {
    pub fn success(value: Value) -> Self {
        MethodResult::Success { value }
    }

    pub fn ok() -> Self {
        Self::success(Value::Null)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        MethodResult::Error {
            code: code.to_string(),
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MethodResult::Success { .. })
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            MethodResult::Error { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }
}

impl From<PlayerError> for MethodResult {
    fn from(err: PlayerError) -> Self {
        let details = match &err {
            PlayerError::InvalidState { operation, state } => json!({
                "operation": operation.method_name(),
                "state": state.code(),
            }),
            _ => Value::Null,
        };
        MethodResult::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

impl From<nbplayer_core::Result<()>> for MethodResult {
    fn from(result: nbplayer_core::Result<()>) -> Self {
        match result {
            Ok(()) => MethodResult::ok(),
            Err(err) => err.into(),
        }
    }
}

/// Event record pushed on a player's event channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChangeRecord {
    pub event: String,
    pub state: i32,
    #[serde(rename = "oldState")]
    pub old_state: i32,
}

impl StateChangeRecord {
    pub const EVENT: &'static str = "state_change";

    pub fn new(new_state: PlayerState, old_state: PlayerState) -> Self {
        Self {
            event: Self::EVENT.to_string(),
            state: new_state.code(),
            old_state: old_state.code(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "event": self.event,
            "state": self.state,
            "oldState": self.old_state,
        })
    }
}

impl From<StateChangeEvent> for StateChangeRecord {
    fn from(event: StateChangeEvent) -> Self {
        Self::new(event.new_state, event.old_state)
    }
}
