//! Engine configuration loading, including the ranked-game tunables.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the engine looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MATCH_WARDEN_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the engine.
pub struct EngineConfig {
    /// Seconds of game time required per participant before a game may count
    /// as ranked. A game shorter than `players * multiplicator` seconds is
    /// adjudicated as too short.
    pub ranked_min_time_multiplicator: u64,
    /// Lower bound applied when coalescing game snapshot broadcasts.
    pub broadcast_min_delay: Duration,
    /// Upper bound applied when coalescing game snapshot broadcasts.
    pub broadcast_max_delay: Duration,
}

impl EngineConfig {
    /// Load the engine configuration from disk, falling back to the built-in
    /// defaults when the file is missing or unreadable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded engine config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ranked_min_time_multiplicator: 60,
            broadcast_min_delay: Duration::from_secs(1),
            broadcast_max_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file.
struct RawConfig {
    ranked_min_time_multiplicator: Option<u64>,
    broadcast_min_delay_ms: Option<u64>,
    broadcast_max_delay_ms: Option<u64>,
}

impl From<RawConfig> for EngineConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = EngineConfig::default();
        Self {
            ranked_min_time_multiplicator: value
                .ranked_min_time_multiplicator
                .unwrap_or(defaults.ranked_min_time_multiplicator),
            broadcast_min_delay: value
                .broadcast_min_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.broadcast_min_delay),
            broadcast_max_delay: value
                .broadcast_max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.broadcast_max_delay),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
