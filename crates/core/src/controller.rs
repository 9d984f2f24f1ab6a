// Per-player playback controller
//
// Owns the player state and its engine under one mutex. Caller operations and
// engine callbacks both go through that mutex; notifications are queued while
// it is held so observers see transitions in the order they happened.

use crate::config::PlayerConfig;
use crate::engine::{EngineEvent, EngineFactory, EngineListener, EngineOption, MediaEngine, OptionCategory, START_ON_PREPARED};
use crate::error::{EngineError, PlayerError, Result};
use crate::notifier::{Dispatcher, EventNotifier, EventSink, StateChangeEvent};
use crate::registry::PlayerMap;
use crate::state::{Operation, PausePolicy, PlayerState};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Caller-issued command with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetDataSource(String),
    PrepareAsync,
    StartFromInitialized,
    Start,
    Pause,
    Stop,
    Reset,
    Release,
}

impl Command {
    pub fn operation(&self) -> Operation {
        match self {
            Command::SetDataSource(_) => Operation::SetDataSource,
            Command::PrepareAsync => Operation::PrepareAsync,
            Command::StartFromInitialized => Operation::StartFromInitialized,
            Command::Start => Operation::Start,
            Command::Pause => Operation::Pause,
            Command::Stop => Operation::Stop,
            Command::Reset => Operation::Reset,
            Command::Release => Operation::Release,
        }
    }
}

struct ControllerInner {
    state: PlayerState,
    engine: Option<Box<dyn MediaEngine>>,
    /// Bumped whenever the current engine is superseded; callbacks carrying an
    /// older generation are dropped.
    generation: u64,
    data_source: Option<String>,
}

pub struct PlaybackController {
    player_id: String,
    inner: Mutex<ControllerInner>,
    notifier: EventNotifier,
    factory: Arc<dyn EngineFactory>,
    config: Arc<PlayerConfig>,
    registry: Option<Weak<PlayerMap>>,
    this: Weak<PlaybackController>,
}

impl PlaybackController {
    pub fn new(
        player_id: &str,
        factory: Arc<dyn EngineFactory>,
        config: Arc<PlayerConfig>,
        dispatcher: Arc<Dispatcher>,
    ) -> Arc<Self> {
        Self::build(player_id, factory, config, dispatcher, None)
    }

    pub(crate) fn build(
        player_id: &str,
        factory: Arc<dyn EngineFactory>,
        config: Arc<PlayerConfig>,
        dispatcher: Arc<Dispatcher>,
        registry: Option<Weak<PlayerMap>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            player_id: player_id.to_string(),
            inner: Mutex::new(ControllerInner {
                state: PlayerState::Idle,
                engine: None,
                generation: 0,
                data_source: None,
            }),
            notifier: EventNotifier::new(dispatcher),
            factory,
            config,
            registry,
            this: this.clone(),
        })
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn state(&self) -> PlayerState {
        self.inner.lock().state
    }

    pub fn data_source(&self) -> Option<String> {
        self.inner.lock().data_source.clone()
    }

    pub fn has_engine(&self) -> bool {
        self.inner.lock().engine.is_some()
    }

    pub fn attach_sink(&self, sink: Arc<dyn EventSink>) {
        self.notifier.attach(sink);
    }

    pub fn detach_sink(&self) {
        self.notifier.detach();
    }

    pub fn dispatch(&self, command: Command) -> Result<()> {
        match command {
            Command::SetDataSource(url) => self.set_data_source(&url),
            Command::PrepareAsync => self.prepare_async(),
            Command::StartFromInitialized => self.start_from_initialized(),
            Command::Start => self.start(),
            Command::Pause => self.pause(),
            Command::Stop => self.stop(),
            Command::Reset => self.reset(),
            Command::Release => self.release(),
        }
    }

    /// Create a fresh engine for `url`, replacing any previous one.
    pub fn set_data_source(&self, url: &str) -> Result<()> {
        let mut retired = None;
        let result = self.set_data_source_locked(url, &mut retired);
        release_engine(&self.player_id, retired);
        result
    }

    fn set_data_source_locked(&self, url: &str, retired: &mut Option<Box<dyn MediaEngine>>) -> Result<()> {
        let op = Operation::SetDataSource;
        let mut inner = self.inner.lock();
        self.check(op, inner.state)?;
        if url.is_empty() {
            return Err(PlayerError::InvalidArgument("URL cannot be null or empty".to_string()));
        }

        *retired = inner.engine.take();
        inner.generation += 1;
        inner.data_source = None;

        let listener = self.listener(inner.generation);
        let mut engine = match self.factory.create(&self.player_id, listener) {
            Ok(engine) => engine,
            Err(e) => return Err(self.fail(&mut inner, op, e)),
        };

        let applied = apply_options(engine.as_mut(), &self.config.engine_options)
            .and_then(|_| engine.set_data_source(url));
        inner.engine = Some(engine);
        if let Err(e) = applied {
            return Err(self.fail(&mut inner, op, e));
        }

        inner.data_source = Some(url.to_string());
        self.transition(&mut inner, PlayerState::Initialized);
        log::info!("[{}] data source set: {}", self.player_id, url);
        Ok(())
    }

    pub fn prepare_async(&self) -> Result<()> {
        let op = Operation::PrepareAsync;
        let mut inner = self.inner.lock();
        let target = self.check(op, inner.state)?;
        if let Err(e) = with_engine(&mut inner, |engine| engine.prepare_async()) {
            return Err(self.fail(&mut inner, op, e));
        }
        self.transition(&mut inner, target);
        log::info!("[{}] prepareAsync submitted", self.player_id);
        Ok(())
    }

    /// Prepare with the engine told to start on its own once prepared.
    pub fn start_from_initialized(&self) -> Result<()> {
        let op = Operation::StartFromInitialized;
        let mut inner = self.inner.lock();
        let target = self.check(op, inner.state)?;
        let auto_start = EngineOption::int(OptionCategory::Player, START_ON_PREPARED, 1);
        let submitted = with_engine(&mut inner, |engine| {
            engine.set_option(&auto_start)?;
            engine.prepare_async()
        });
        if let Err(e) = submitted {
            return Err(self.fail(&mut inner, op, e));
        }
        self.transition(&mut inner, target);
        log::info!("[{}] startFromInitialized submitted", self.player_id);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let op = Operation::Start;
        let mut inner = self.inner.lock();
        let target = self.check(op, inner.state)?;
        if let Err(e) = with_engine(&mut inner, |engine| engine.start()) {
            return Err(self.fail(&mut inner, op, e));
        }
        self.transition(&mut inner, target);
        log::info!("[{}] start called", self.player_id);
        Ok(())
    }

    /// Pause the engine. The player state is left as is.
    pub fn pause(&self) -> Result<()> {
        let op = Operation::Pause;
        let mut inner = self.inner.lock();
        let allowed = match self.config.pause_policy {
            PausePolicy::Playable => op.is_valid_from(inner.state),
            PausePolicy::Playing => match inner.engine.as_ref() {
                Some(engine) => inner.state != PlayerState::End && engine.is_playing(),
                None => inner.state == PlayerState::Started,
            },
        };
        if !allowed {
            return Err(self.reject(op, inner.state));
        }
        if let Err(e) = with_engine(&mut inner, |engine| engine.pause()) {
            return Err(self.fail(&mut inner, op, e));
        }
        log::info!("[{}] pause called", self.player_id);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let op = Operation::Stop;
        let mut inner = self.inner.lock();
        let target = self.check(op, inner.state)?;
        if let Err(e) = with_engine(&mut inner, |engine| engine.stop()) {
            return Err(self.fail(&mut inner, op, e));
        }
        self.transition(&mut inner, target);
        log::info!("[{}] stop called", self.player_id);
        Ok(())
    }

    /// Back to Idle. The engine is reset and kept until the next data source.
    pub fn reset(&self) -> Result<()> {
        let op = Operation::Reset;
        let mut inner = self.inner.lock();
        let target = self.check(op, inner.state)?;
        if let Err(e) = with_engine(&mut inner, |engine| engine.reset()) {
            return Err(self.fail(&mut inner, op, e));
        }
        inner.generation += 1;
        inner.data_source = None;
        self.transition(&mut inner, target);
        log::info!("[{}] reset called", self.player_id);
        Ok(())
    }

    /// Terminal. Idempotent, never fails, unregisters the player.
    pub fn release(&self) -> Result<()> {
        // Unregister before End: a create racing with this release gets a fresh player
        self.unregister();

        let engine = {
            let mut inner = self.inner.lock();
            if inner.state == PlayerState::End {
                log::debug!("[{}] release on already released player", self.player_id);
                return Ok(());
            }
            inner.generation += 1;
            inner.data_source = None;
            self.transition(&mut inner, PlayerState::End);
            inner.engine.take()
        };

        // Engine teardown may join engine threads that are waiting on our lock
        release_engine(&self.player_id, engine);
        self.notifier.close();
        log::info!("[{}] released", self.player_id);
        Ok(())
    }

    fn unregister(&self) {
        let Some(map) = self.registry.as_ref().and_then(Weak::upgrade) else {
            return;
        };
        let mut players = map.write();
        let is_current = players
            .get(&self.player_id)
            .is_some_and(|p| std::ptr::eq(Arc::as_ptr(p), self as *const Self));
        if is_current {
            players.remove(&self.player_id);
        }
    }

    fn listener(&self, generation: u64) -> EngineListener {
        let this = self.this.clone();
        let player_id = self.player_id.clone();
        EngineListener::new(move |event| match this.upgrade() {
            Some(controller) => controller.on_engine_event(generation, event),
            None => log::debug!("[{}] engine event {:?} after player dropped", player_id, event),
        })
    }

    fn on_engine_event(&self, generation: u64, event: EngineEvent) {
        let mut inner = self.inner.lock();
        if generation != inner.generation || inner.state == PlayerState::End {
            log::debug!("[{}] ignoring stale engine event {:?}", self.player_id, event);
            return;
        }

        match event {
            EngineEvent::Prepared => {
                if inner.state == PlayerState::Preparing {
                    log::info!("[{}] onPrepared", self.player_id);
                    self.transition(&mut inner, PlayerState::Prepared);
                } else {
                    log::warn!("[{}] onPrepared ignored in state {}", self.player_id, inner.state);
                }
            }
            EngineEvent::Completed => {
                if matches!(inner.state, PlayerState::Prepared | PlayerState::Started | PlayerState::Paused) {
                    log::info!("[{}] onCompletion", self.player_id);
                    self.transition(&mut inner, PlayerState::Completed);
                } else {
                    log::warn!("[{}] onCompletion ignored in state {}", self.player_id, inner.state);
                }
            }
            EngineEvent::Error { what, extra } => {
                log::error!("[{}] onError: what={}, extra={}", self.player_id, what, extra);
                self.transition(&mut inner, PlayerState::Error);
            }
            EngineEvent::Info { .. } if event.is_rendering_start() => {
                if matches!(inner.state, PlayerState::Preparing | PlayerState::Prepared) {
                    self.transition(&mut inner, PlayerState::Started);
                }
            }
            EngineEvent::Info { what, extra } => {
                log::debug!("[{}] onInfo: what={}, extra={}", self.player_id, what, extra);
            }
            EngineEvent::SeekComplete => {
                log::info!("[{}] onSeekComplete", self.player_id);
            }
        }
    }

    fn check(&self, op: Operation, state: PlayerState) -> Result<PlayerState> {
        op.validate(state).map_err(|e| {
            log::warn!("[{}] {}", self.player_id, e);
            e
        })
    }

    fn reject(&self, op: Operation, state: PlayerState) -> PlayerError {
        let err = PlayerError::InvalidState { operation: op, state };
        log::warn!("[{}] {}", self.player_id, err);
        err
    }

    fn fail(&self, inner: &mut ControllerInner, op: Operation, err: EngineError) -> PlayerError {
        log::error!("[{}] {} failed: {}", self.player_id, op, err);
        if op.fails_into_error() {
            self.transition(inner, PlayerState::Error);
        }
        PlayerError::engine(op, err)
    }

    fn transition(&self, inner: &mut ControllerInner, new_state: PlayerState) {
        let old_state = inner.state;
        if old_state == new_state {
            return;
        }
        inner.state = new_state;
        log::info!("[{}] State changed: {} -> {}", self.player_id, old_state, new_state);
        self.notifier.emit(StateChangeEvent { old_state, new_state });
    }
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("player_id", &self.player_id)
            .field("state", &self.state())
            .finish()
    }
}

fn apply_options(engine: &mut dyn MediaEngine, options: &[EngineOption]) -> std::result::Result<(), EngineError> {
    for option in options {
        log::debug!("set option {:?}/{}={}", option.category, option.name, option.value);
        engine.set_option(option)?;
    }
    Ok(())
}

fn with_engine<F>(inner: &mut ControllerInner, f: F) -> std::result::Result<(), EngineError>
where
    F: FnOnce(&mut dyn MediaEngine) -> std::result::Result<(), EngineError>,
{
    match inner.engine.as_mut() {
        Some(engine) => f(engine.as_mut()),
        None => Ok(()),
    }
}

fn release_engine(player_id: &str, engine: Option<Box<dyn MediaEngine>>) {
    if let Some(mut engine) = engine {
        if let Err(e) = engine.release() {
            log::error!("[{}] Error releasing media engine: {}", player_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EngineCall, RecordingEngineFactory, RecordingSink};

    struct Fixture {
        controller: Arc<PlaybackController>,
        factory: Arc<RecordingEngineFactory>,
        sink: Arc<RecordingSink>,
        dispatcher: Arc<Dispatcher>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(PlayerConfig::default())
        }

        fn with_config(config: PlayerConfig) -> Self {
            let factory = Arc::new(RecordingEngineFactory::new());
            let dispatcher = Arc::new(Dispatcher::new("controller-test"));
            let controller = PlaybackController::new("p1", factory.clone(), Arc::new(config), dispatcher.clone());
            let sink = Arc::new(RecordingSink::new());
            controller.attach_sink(sink.clone());
            Self {
                controller,
                factory,
                sink,
                dispatcher,
            }
        }

        fn transitions(&self) -> Vec<(PlayerState, PlayerState)> {
            self.dispatcher.flush();
            self.sink
                .events()
                .into_iter()
                .map(|e| (e.old_state, e.new_state))
                .collect()
        }

        /// Drive the player into `state` using operations and engine events.
        fn reach(&self, state: PlayerState) {
            let c = &self.controller;
            match state {
                PlayerState::Idle => {}
                PlayerState::Initialized => c.set_data_source("http://x/a.mp3").unwrap(),
                PlayerState::Preparing => {
                    self.reach(PlayerState::Initialized);
                    c.prepare_async().unwrap();
                }
                PlayerState::Prepared => {
                    self.reach(PlayerState::Preparing);
                    self.factory.fire(EngineEvent::Prepared);
                }
                PlayerState::Started => {
                    self.reach(PlayerState::Prepared);
                    c.start().unwrap();
                }
                PlayerState::Paused => {
                    // Only an engine-side state; the bridge never enters it on its own
                    self.reach(PlayerState::Started);
                    c.inner.lock().state = PlayerState::Paused;
                }
                PlayerState::Completed => {
                    self.reach(PlayerState::Started);
                    self.factory.fire(EngineEvent::Completed);
                }
                PlayerState::Stopped => {
                    self.reach(PlayerState::Started);
                    c.stop().unwrap();
                }
                PlayerState::Error => {
                    self.reach(PlayerState::Started);
                    self.factory.fire(EngineEvent::Error { what: 1, extra: -1 });
                }
                PlayerState::End => c.release().unwrap(),
            }
            assert_eq!(c.state(), state);
        }
    }

    fn command_for(op: Operation) -> Command {
        match op {
            Operation::SetDataSource => Command::SetDataSource("http://x/b.mp3".into()),
            Operation::PrepareAsync => Command::PrepareAsync,
            Operation::StartFromInitialized => Command::StartFromInitialized,
            Operation::Start => Command::Start,
            Operation::Pause => Command::Pause,
            Operation::Stop => Command::Stop,
            Operation::Reset => Command::Reset,
            Operation::Release => Command::Release,
        }
    }

    #[test]
    fn test_invalid_operations_leave_state_unchanged() {
        for state in PlayerState::ALL {
            for op in Operation::ALL {
                if op.is_valid_from(state) {
                    continue;
                }
                let fx = Fixture::new();
                fx.reach(state);
                let before = fx.transitions().len();

                let err = fx.controller.dispatch(command_for(op)).unwrap_err();
                assert_eq!(err, PlayerError::InvalidState { operation: op, state }, "{} from {}", op, state);
                assert_eq!(fx.controller.state(), state);
                assert_eq!(fx.transitions().len(), before);
            }
        }
    }

    #[test]
    fn test_engine_present_outside_idle_and_end() {
        for state in PlayerState::ALL {
            let fx = Fixture::new();
            fx.reach(state);
            assert_eq!(fx.controller.has_engine(), state.requires_engine(), "{}", state);
        }
    }

    #[test]
    fn test_set_data_source_emits_initialized() {
        let fx = Fixture::new();
        fx.controller.set_data_source("http://x/a.mp3").unwrap();

        assert_eq!(fx.transitions(), vec![(PlayerState::Idle, PlayerState::Initialized)]);
        assert_eq!(fx.controller.data_source().as_deref(), Some("http://x/a.mp3"));

        let calls = fx.factory.calls();
        let options = calls.iter().filter(|c| matches!(c, EngineCall::SetOption(..))).count();
        assert_eq!(options, PlayerConfig::default().engine_options.len());
        assert_eq!(calls.last(), Some(&EngineCall::SetDataSource("http://x/a.mp3".into())));
    }

    #[test]
    fn test_set_data_source_rejects_empty_url() {
        let fx = Fixture::new();
        let err = fx.controller.set_data_source("").unwrap_err();
        assert!(matches!(err, PlayerError::InvalidArgument(_)));
        assert_eq!(fx.controller.state(), PlayerState::Idle);
        assert_eq!(fx.factory.created(), 0);
        assert!(fx.transitions().is_empty());
    }

    #[test]
    fn test_set_data_source_replaces_engine() {
        let fx = Fixture::new();
        fx.controller.set_data_source("http://x/a.mp3").unwrap();
        fx.controller.set_data_source("http://x/b.mp3").unwrap();

        assert_eq!(fx.factory.created(), 2);
        assert!(fx.factory.calls().contains(&EngineCall::Release));
        assert_eq!(fx.controller.state(), PlayerState::Initialized);
        // Initialized -> Initialized is not a transition
        assert_eq!(fx.transitions().len(), 1);
    }

    #[test]
    fn test_set_data_source_failure_moves_to_error() {
        let fx = Fixture::new();
        fx.factory.fail_call("set_data_source");
        let err = fx.controller.set_data_source("http://x/a.mp3").unwrap_err();

        assert_eq!(err.code(), "SET_DATA_SOURCE_ERROR");
        assert_eq!(fx.controller.state(), PlayerState::Error);
        assert!(fx.controller.has_engine());
        assert_eq!(fx.transitions(), vec![(PlayerState::Idle, PlayerState::Error)]);
    }

    #[test]
    fn test_engine_creation_failure_moves_to_error() {
        let fx = Fixture::new();
        fx.factory.fail_create(true);
        let err = fx.controller.set_data_source("http://x/a.mp3").unwrap_err();

        assert!(matches!(err, PlayerError::EngineFailure { operation: Operation::SetDataSource, .. }));
        assert_eq!(fx.controller.state(), PlayerState::Error);
        assert!(!fx.controller.has_engine());

        // Still recoverable without an engine
        fx.controller.stop().unwrap();
        fx.controller.reset().unwrap();
        assert_eq!(fx.controller.state(), PlayerState::Idle);
    }

    #[test]
    fn test_prepare_then_prepared() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Initialized);
        fx.controller.prepare_async().unwrap();
        fx.factory.fire(EngineEvent::Prepared);

        assert_eq!(
            fx.transitions(),
            vec![
                (PlayerState::Idle, PlayerState::Initialized),
                (PlayerState::Initialized, PlayerState::Preparing),
                (PlayerState::Preparing, PlayerState::Prepared),
            ]
        );
    }

    #[test]
    fn test_prepare_failure_moves_to_error() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Initialized);
        fx.factory.fail_call("prepare_async");
        let err = fx.controller.prepare_async().unwrap_err();
        assert_eq!(err.code(), "PREPARE_ERROR");
        assert_eq!(fx.controller.state(), PlayerState::Error);
    }

    #[test]
    fn test_prepared_outside_preparing_is_ignored() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        let before = fx.transitions().len();
        fx.factory.fire(EngineEvent::Prepared);
        assert_eq!(fx.controller.state(), PlayerState::Started);
        assert_eq!(fx.transitions().len(), before);
    }

    #[test]
    fn test_start_from_initialized_auto_starts() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Initialized);
        fx.controller.start_from_initialized().unwrap();

        let auto_start = EngineCall::SetOption(START_ON_PREPARED.into(), crate::engine::OptionValue::Int(1));
        assert!(fx.factory.calls().contains(&auto_start));
        assert_eq!(fx.controller.state(), PlayerState::Preparing);

        fx.factory.fire(EngineEvent::Prepared);
        fx.factory.fire(EngineEvent::Info {
            what: crate::engine::MEDIA_INFO_AUDIO_RENDERING_START,
            extra: 0,
        });
        assert_eq!(fx.controller.state(), PlayerState::Started);
        assert_eq!(
            fx.transitions().last(),
            Some(&(PlayerState::Prepared, PlayerState::Started))
        );
    }

    #[test]
    fn test_rendering_start_after_start_is_not_a_transition() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        let before = fx.transitions().len();
        fx.factory.fire(EngineEvent::Info {
            what: crate::engine::MEDIA_INFO_VIDEO_RENDERING_START,
            extra: 0,
        });
        assert_eq!(fx.transitions().len(), before);
    }

    #[test]
    fn test_rendering_start_ignored_when_stopped() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Stopped);
        fx.factory.fire(EngineEvent::Info {
            what: crate::engine::MEDIA_INFO_AUDIO_RENDERING_START,
            extra: 0,
        });
        assert_eq!(fx.controller.state(), PlayerState::Stopped);
    }

    #[test]
    fn test_start_and_pause_from_playable_states() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Prepared);

        fx.controller.pause().unwrap();
        assert_eq!(fx.controller.state(), PlayerState::Prepared);

        fx.controller.start().unwrap();
        fx.controller.start().unwrap();
        fx.controller.pause().unwrap();
        fx.controller.pause().unwrap();
        assert_eq!(fx.controller.state(), PlayerState::Started);
        assert_eq!(fx.transitions().last(), Some(&(PlayerState::Prepared, PlayerState::Started)));
        assert_eq!(fx.factory.count("pause"), 3);
    }

    #[test]
    fn test_pause_playing_policy() {
        let fx = Fixture::with_config(PlayerConfig {
            pause_policy: PausePolicy::Playing,
            ..PlayerConfig::default()
        });
        fx.reach(PlayerState::Prepared);

        let err = fx.controller.pause().unwrap_err();
        assert_eq!(
            err,
            PlayerError::InvalidState {
                operation: Operation::Pause,
                state: PlayerState::Prepared
            }
        );

        fx.controller.start().unwrap();
        fx.controller.pause().unwrap();
        // Engine is no longer playing
        assert!(fx.controller.pause().is_err());
    }

    #[test]
    fn test_start_failure_moves_to_error() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Prepared);
        fx.factory.fail_call("start");
        let err = fx.controller.start().unwrap_err();
        assert_eq!(err.code(), "START_ERROR");
        assert_eq!(fx.controller.state(), PlayerState::Error);
    }

    #[test]
    fn test_error_then_reset() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        fx.factory.fire(EngineEvent::Error { what: 1, extra: -1 });
        assert_eq!(fx.controller.state(), PlayerState::Error);

        let err = fx.controller.start().unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        fx.controller.reset().unwrap();
        assert_eq!(fx.controller.state(), PlayerState::Idle);
        assert_eq!(
            &fx.transitions()[4..],
            &[
                (PlayerState::Started, PlayerState::Error),
                (PlayerState::Error, PlayerState::Idle)
            ]
        );
    }

    #[test]
    fn test_completion_after_error_keeps_error() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Error);
        let before = fx.transitions().len();
        fx.factory.fire(EngineEvent::Completed);

        assert_eq!(fx.controller.state(), PlayerState::Error);
        assert_eq!(fx.transitions().len(), before);
        assert_eq!(fx.controller.start().unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn test_completion_only_from_playing_states() {
        for state in PlayerState::ALL {
            let fx = Fixture::new();
            fx.reach(state);
            fx.factory.fire(EngineEvent::Completed);

            let expected = match state {
                PlayerState::Prepared | PlayerState::Started | PlayerState::Paused => PlayerState::Completed,
                other => other,
            };
            assert_eq!(fx.controller.state(), expected, "completion from {}", state);
        }

        let fx = Fixture::new();
        fx.reach(PlayerState::Stopped);
        fx.factory.fire(EngineEvent::Completed);
        assert_eq!(fx.controller.start().unwrap_err().code(), "INVALID_STATE");
    }

    #[test]
    fn test_reset_failure_keeps_state() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        fx.factory.fail_call("reset");
        let err = fx.controller.reset().unwrap_err();
        assert_eq!(err.code(), "RESET_ERROR");
        assert_eq!(fx.controller.state(), PlayerState::Started);
    }

    #[test]
    fn test_reset_discards_stale_callbacks() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Preparing);
        fx.controller.reset().unwrap();
        // The reset engine still delivers its pending prepared callback
        fx.factory.fire(EngineEvent::Prepared);
        fx.factory.fire(EngineEvent::Completed);
        assert_eq!(fx.controller.state(), PlayerState::Idle);
        assert!(fx.controller.has_engine());
    }

    #[test]
    fn test_old_engine_callbacks_ignored_after_new_source() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Initialized);
        let first = fx.factory.listener(0).unwrap();
        fx.controller.set_data_source("http://x/b.mp3").unwrap();
        fx.controller.prepare_async().unwrap();

        first.emit(EngineEvent::Prepared);
        assert_eq!(fx.controller.state(), PlayerState::Preparing);
        fx.factory.fire(EngineEvent::Prepared);
        assert_eq!(fx.controller.state(), PlayerState::Prepared);
    }

    #[test]
    fn test_release_is_idempotent() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        fx.controller.release().unwrap();
        fx.controller.release().unwrap();

        assert_eq!(fx.controller.state(), PlayerState::End);
        assert!(!fx.controller.has_engine());
        assert_eq!(fx.factory.count("release"), 1);

        let transitions = fx.transitions();
        let ends = transitions.iter().filter(|(_, new)| *new == PlayerState::End).count();
        assert_eq!(ends, 1);
        assert_eq!(transitions.last(), Some(&(PlayerState::Started, PlayerState::End)));
    }

    #[test]
    fn test_release_ignores_engine_failure() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Initialized);
        fx.factory.fail_call("release");
        fx.controller.release().unwrap();
        assert_eq!(fx.controller.state(), PlayerState::End);
    }

    #[test]
    fn test_callbacks_after_release_are_ignored() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        fx.controller.release().unwrap();
        fx.factory.fire(EngineEvent::Error { what: 1, extra: -1 });
        assert_eq!(fx.controller.state(), PlayerState::End);
    }

    #[test]
    fn test_listener_outliving_controller() {
        let factory = Arc::new(RecordingEngineFactory::new());
        let controller = PlaybackController::new(
            "gone",
            factory.clone(),
            Arc::new(PlayerConfig::default()),
            Arc::new(Dispatcher::new("controller-test")),
        );
        controller.set_data_source("http://x/a.mp3").unwrap();
        drop(controller);
        factory.fire(EngineEvent::Completed);
    }

    struct ReleasingSink {
        controller: Mutex<Option<Arc<PlaybackController>>>,
        seen: Mutex<Vec<StateChangeEvent>>,
    }

    impl EventSink for ReleasingSink {
        fn on_event(&self, event: StateChangeEvent) {
            self.seen.lock().push(event);
            if event.new_state == PlayerState::Error {
                let controller = self.controller.lock().clone();
                if let Some(controller) = controller {
                    controller.release().unwrap();
                }
            }
        }
    }

    #[test]
    fn test_release_from_event_handler() {
        let fx = Fixture::new();
        let sink = Arc::new(ReleasingSink {
            controller: Mutex::new(Some(fx.controller.clone())),
            seen: Mutex::new(Vec::new()),
        });
        fx.controller.attach_sink(sink.clone());
        fx.reach(PlayerState::Started);
        fx.factory.fire(EngineEvent::Error { what: 1, extra: -1 });
        fx.dispatcher.flush();
        fx.dispatcher.flush();

        assert_eq!(fx.controller.state(), PlayerState::End);
        assert_eq!(
            sink.seen.lock().last(),
            Some(&StateChangeEvent {
                old_state: PlayerState::Error,
                new_state: PlayerState::End
            })
        );
    }

    #[test]
    fn test_concurrent_callbacks_and_operations() {
        let fx = Fixture::new();
        fx.reach(PlayerState::Started);
        let listener = fx.factory.listener(0).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let listener = listener.clone();
                let controller = fx.controller.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if i % 2 == 0 {
                            listener.emit(EngineEvent::Completed);
                        } else {
                            let _ = controller.start();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Each event must chain from the previous one
        let transitions = fx.transitions();
        for pair in transitions.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert!(transitions.iter().all(|(old, new)| old != new));
    }
}
