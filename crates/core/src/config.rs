// Player configuration: engine option defaults and the pause gate

use crate::engine::{EngineOption, OptionCategory};
use crate::state::PausePolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Player configuration
///
/// ```toml
/// pause_policy = "playable"
///
/// [[engine_options]]
/// category = "format"
/// name = "timeout"
/// value = 30000000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Options applied to every engine before its data source is set
    pub engine_options: Vec<EngineOption>,
    /// Gate used by `pause`
    pub pause_policy: PausePolicy,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            engine_options: default_engine_options(),
            pause_policy: PausePolicy::default(),
        }
    }
}

impl PlayerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cfg = Self::from_toml_str(&raw)?;
        log::info!(
            "Loaded player config from {} ({} engine options)",
            path.display(),
            cfg.engine_options.len()
        );
        Ok(cfg)
    }
}

/// Audio-oriented defaults: software decoding, OpenSL ES output, 30s network
/// timeout with reconnect, no automatic start once prepared.
pub fn default_engine_options() -> Vec<EngineOption> {
    vec![
        EngineOption::int(OptionCategory::Player, "mediacodec", 0),
        EngineOption::int(OptionCategory::Player, "opensles", 1),
        EngineOption::int(OptionCategory::Player, crate::engine::START_ON_PREPARED, 0),
        EngineOption::int(OptionCategory::Format, "http-detect-range-support", 0),
        EngineOption::int(OptionCategory::Format, "timeout", 30_000_000),
        EngineOption::int(OptionCategory::Format, "reconnect", 1),
        EngineOption::int(OptionCategory::Codec, "skip_loop_filter", 48),
    ]
}
