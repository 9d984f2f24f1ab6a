// Process-wide player registry: player id -> controller

use crate::config::PlayerConfig;
use crate::controller::PlaybackController;
use crate::engine::EngineFactory;
use crate::error::{PlayerError, Result};
use crate::notifier::Dispatcher;
use crate::state::PlayerState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type PlayerMap = RwLock<HashMap<String, Arc<PlaybackController>>>;

/// Concurrent map of live players
///
/// Controllers are handed out as `Arc`s, so a lookup that raced with a
/// removal keeps a valid (released) controller rather than a dangling one.
pub struct Registry {
    players: Arc<PlayerMap>,
    factory: Arc<dyn EngineFactory>,
    config: Arc<PlayerConfig>,
    dispatcher: Arc<Dispatcher>,
}

impl Registry {
    pub fn new(factory: Arc<dyn EngineFactory>, config: PlayerConfig) -> Self {
        Self::with_dispatcher(factory, config, Dispatcher::global())
    }

    pub fn with_dispatcher(factory: Arc<dyn EngineFactory>, config: PlayerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            players: Arc::new(RwLock::new(HashMap::new())),
            factory,
            config: Arc::new(config),
            dispatcher,
        }
    }

    /// Create a player, or return the live one registered under `player_id`.
    pub fn create(&self, player_id: &str) -> Result<Arc<PlaybackController>> {
        if player_id.is_empty() {
            return Err(PlayerError::InvalidArgument("playerId cannot be null".to_string()));
        }

        let mut players = self.players.write();
        if let Some(existing) = players.get(player_id) {
            if existing.state() != PlayerState::End {
                return Ok(existing.clone());
            }
            log::debug!("Replacing released player: {}", player_id);
        }

        let controller = PlaybackController::build(
            player_id,
            self.factory.clone(),
            self.config.clone(),
            self.dispatcher.clone(),
            Some(Arc::downgrade(&self.players)),
        );
        players.insert(player_id.to_string(), controller.clone());
        log::info!("Created player: {}", player_id);
        Ok(controller)
    }

    pub fn get(&self, player_id: &str) -> Result<Arc<PlaybackController>> {
        self.players
            .read()
            .get(player_id)
            .cloned()
            .ok_or_else(|| PlayerError::NotFound(player_id.to_string()))
    }

    /// Release and unregister a player. Unknown ids are a no-op.
    pub fn release(&self, player_id: &str) -> bool {
        let removed = self.players.write().remove(player_id);
        match removed {
            Some(controller) => {
                // The controller's own unregister finds nothing left to remove
                let _ = controller.release();
                log::info!("Released player: {}", player_id);
                true
            }
            None => {
                log::debug!("Release of unknown player: {}", player_id);
                false
            }
        }
    }

    /// Release every player, e.g. when the host detaches.
    pub fn release_all(&self) {
        let drained: Vec<_> = self.players.write().drain().map(|(_, c)| c).collect();
        for controller in drained {
            let _ = controller.release();
        }
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.read().contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.players.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.read().is_empty()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}
