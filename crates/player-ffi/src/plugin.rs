// Plugin object: routes global and per-player method calls to the registry

use crate::channel::{MethodCall, MethodResult, StateChangeRecord};
use nbplayer_core::{Command, EngineFactory, EventSink, Operation, PlaybackController, PlayerConfig, PlayerError, Registry, StateChangeEvent};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Host-side endpoint of a player's event channel
pub trait EventChannelSink: Send + Sync {
    fn success(&self, event: Value);
}

/// Adapts a channel endpoint to the core sink, encoding each transition as a
/// `state_change` record.
struct ChannelEventSink {
    inner: Arc<dyn EventChannelSink>,
}

impl EventSink for ChannelEventSink {
    fn on_event(&self, event: StateChangeEvent) {
        self.inner.success(StateChangeRecord::from(event).to_value());
    }
}

pub struct NbPlayerPlugin {
    registry: Registry,
    platform_version: String,
}

impl NbPlayerPlugin {
    pub fn new(factory: Arc<dyn EngineFactory>, config: PlayerConfig) -> Self {
        Self::with_registry(Registry::new(factory, config))
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            platform_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// Override the `getPlatformVersion` reply, e.g. with `"Android 14"`.
    pub fn with_platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = version.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle a call on the global channel.
    pub fn on_global_call(&self, call: &MethodCall) -> MethodResult {
        guard(&call.method, || match call.method.as_str() {
            "createPlayer" => {
                let Some(player_id) = call.argument_str("playerId") else {
                    return MethodResult::error("INVALID_ARGUMENT", "playerId cannot be null");
                };
                match self.registry.create(player_id) {
                    Ok(_) => MethodResult::ok(),
                    Err(e) => e.into(),
                }
            }
            "releasePlayer" => {
                let Some(player_id) = call.argument_str("playerId") else {
                    return MethodResult::error("INVALID_ARGUMENT", "playerId cannot be null");
                };
                self.registry.release(player_id);
                MethodResult::ok()
            }
            _ => MethodResult::NotImplemented,
        })
    }

    /// Handle a call on `methods_{player_id}`.
    pub fn on_player_call(&self, player_id: &str, call: &MethodCall) -> MethodResult {
        let controller = match self.registry.get(player_id) {
            Ok(controller) => controller,
            Err(_) if call.method == Operation::Release.method_name() => {
                log::debug!("[{}] release on unknown player", player_id);
                return MethodResult::ok();
            }
            Err(e) => return e.into(),
        };
        guard(&call.method, || dispatch(&controller, call, &self.platform_version))
    }

    /// `onListen` on `events_{player_id}`.
    pub fn listen(&self, player_id: &str, sink: Arc<dyn EventChannelSink>) -> Result<(), PlayerError> {
        let controller = self.registry.get(player_id)?;
        controller.attach_sink(Arc::new(ChannelEventSink { inner: sink }));
        Ok(())
    }

    /// `onCancel` on `events_{player_id}`.
    pub fn cancel(&self, player_id: &str) {
        if let Ok(controller) = self.registry.get(player_id) {
            controller.detach_sink();
        }
    }

    /// Host engine detached: release every player and wait for their last events.
    pub fn on_detached(&self) {
        let count = self.registry.len();
        self.registry.release_all();
        self.registry.dispatcher().flush();
        log::info!("Plugin detached, released {} players", count);
    }
}

fn dispatch(controller: &PlaybackController, call: &MethodCall, platform_version: &str) -> MethodResult {
    let command = match call.method.as_str() {
        "getPlatformVersion" => return MethodResult::success(Value::from(platform_version)),
        "getState" => return MethodResult::success(Value::from(controller.state().code())),
        "setDataSource" => Command::SetDataSource(call.argument_str("url").unwrap_or_default().to_string()),
        method => match Operation::from_method_name(method) {
            Some(Operation::PrepareAsync) => Command::PrepareAsync,
            Some(Operation::StartFromInitialized) => Command::StartFromInitialized,
            Some(Operation::Start) => Command::Start,
            Some(Operation::Pause) => Command::Pause,
            Some(Operation::Stop) => Command::Stop,
            Some(Operation::Reset) => Command::Reset,
            Some(Operation::Release) => Command::Release,
            Some(Operation::SetDataSource) | None => return MethodResult::NotImplemented,
        },
    };
    let result = controller.dispatch(command);
    if result.is_ok() {
        log::info!("[{}] {} called successfully", controller.player_id(), call.method);
    }
    result.into()
}

/// Keep panics from crossing the channel boundary.
fn guard<F>(method: &str, f: F) -> MethodResult
where
    F: FnOnce() -> MethodResult,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            log::error!("Error handling method call: {}", method);
            MethodResult::error("NATIVE_ERROR", format!("{} panicked", method))
        }
    }
}
