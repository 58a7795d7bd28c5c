//! Application-level configuration loading for the polling runtime timings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_POLL_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Voting window used when a push does not name one.
    pub default_duration: Duration,
    /// Longest voting window a host may request.
    pub max_duration: Duration,
    /// Extra lifetime of the deadline marker past the voting window.
    pub timer_grace: Duration,
    /// Lifetime of the push lock, which also bounds the push critical section.
    pub push_lock_ttl: Duration,
    /// Minimum spacing between two tally broadcasts of one question.
    pub tally_interval: Duration,
    /// Lifetime of the cached audience count served over REST.
    pub presence_cache_ttl: Duration,
    /// Period of the deadline recovery sweep.
    pub sweep_interval: Duration,
    /// How long a fresh socket may stay silent before identifying.
    pub ident_timeout: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        default_duration_secs = app_config.default_duration.as_secs(),
                        tally_interval_ms = app_config.tally_interval.as_millis() as u64,
                        "loaded polling configuration"
                    );
                    app_config
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

    /// Parse a JSON document; absent fields keep their default value.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    default_duration_secs: u64,
    max_duration_secs: u64,
    timer_grace_secs: u64,
    push_lock_ttl_secs: u64,
    tally_interval_ms: u64,
    presence_cache_ttl_secs: u64,
    sweep_interval_secs: u64,
    ident_timeout_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 30,
            max_duration_secs: 3600,
            timer_grace_secs: 5,
            push_lock_ttl_secs: 5,
            tally_interval_ms: 100,
            presence_cache_ttl_secs: 2,
            sweep_interval_secs: 2,
            ident_timeout_secs: 10,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        // Zero would make locks and sweeps spin; clamp to the smallest usable unit.
        let max_duration_secs = value.max_duration_secs.max(1);
        Self {
            default_duration: Duration::from_secs(
                value.default_duration_secs.clamp(1, max_duration_secs),
            ),
            max_duration: Duration::from_secs(max_duration_secs),
            timer_grace: Duration::from_secs(value.timer_grace_secs),
            push_lock_ttl: Duration::from_secs(value.push_lock_ttl_secs.max(1)),
            tally_interval: Duration::from_millis(value.tally_interval_ms),
            presence_cache_ttl: Duration::from_secs(value.presence_cache_ttl_secs.max(1)),
            sweep_interval: Duration::from_secs(value.sweep_interval_secs.max(1)),
            ident_timeout: Duration::from_secs(value.ident_timeout_secs.max(1)),
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
