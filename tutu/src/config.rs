//! Daemon configuration: `<home>/config.toml` plus one environment
//! override for the home directory itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use tutu_pool::PoolConfig;
use tutu_types::GenerationParams;

/// Environment variable overriding the daemon home directory.
pub const HOME_ENV_VAR: &str = "TUTU_HOME";

/// Config file name under the home directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("reading {path}: {source}")]
    Read {
        /// Config file path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file exists but does not parse.
    #[error("parsing {path}: {source}")]
    Parse {
        /// Config file path.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Typed daemon configuration. Every field has a default, so an absent
/// config file means a fully default daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Listen address for the API.
    pub listen: String,
    /// Total bytes of loaded models the pool may hold.
    pub memory_budget_bytes: u64,
    /// Seconds an unreferenced model may sit idle before unload.
    pub idle_timeout_secs: u64,
    /// Reaper tick interval in seconds.
    pub reap_interval_secs: u64,
    /// Context window passed to the backend.
    pub context_size: u32,
    /// GPU layer hint passed to the backend.
    pub gpu_layers: u32,
    /// Backend worker threads; zero means auto.
    pub threads: u32,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Default nucleus sampling cutoff.
    pub top_p: f32,
    /// Default output token cap.
    pub max_tokens: u32,
    /// Default stop sequences.
    pub stop: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:11434".to_string(),
            memory_budget_bytes: 8 * 1024 * 1024 * 1024,
            idle_timeout_secs: 300,
            reap_interval_secs: 30,
            context_size: 4096,
            gpu_layers: 0,
            threads: 0,
            temperature: 0.8,
            top_p: 0.9,
            max_tokens: 2048,
            stop: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Load `<home>/config.toml`; a missing file yields the defaults.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Per-request generation defaults.
    pub fn generation_defaults(&self) -> GenerationParams {
        GenerationParams {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            max_tokens: Some(self.max_tokens),
            stop: self.stop.clone(),
        }
    }

    /// Pool sizing derived from this config.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            memory_budget: self.memory_budget_bytes,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs),
        }
    }
}

/// Resolve the daemon home: `$TUTU_HOME`, else `~/.tutu`, else `./.tutu`
/// when the platform reports no home directory.
pub fn home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .map(|h| h.join(".tutu"))
        .unwrap_or_else(|| PathBuf::from(".tutu"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen, "127.0.0.1:11434");
        assert_eq!(config.memory_budget_bytes, 8 * 1024 * 1024 * 1024);
        assert_eq!(config.idle_timeout_secs, 300);
        assert_eq!(config.reap_interval_secs, 30);
        assert_eq!(config.max_tokens, 2048);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig::load(dir.path()).unwrap();
        assert_eq!(config.listen, DaemonConfig::default().listen);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "listen = \"0.0.0.0:8080\"\nidle_timeout_secs = 60\n",
        )
        .unwrap();

        let config = DaemonConfig::load(dir.path()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8080");
        assert_eq!(config.idle_timeout_secs, 60);
        assert_eq!(config.max_tokens, 2048, "unnamed fields keep defaults");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "listne = \"oops\"\n").unwrap();
        assert!(matches!(
            DaemonConfig::load(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn generation_defaults_carry_config_values() {
        let config = DaemonConfig {
            temperature: 0.2,
            stop: vec!["END".into()],
            ..Default::default()
        };
        let params = config.generation_defaults();
        assert_eq!(params.temperature, Some(0.2));
        assert_eq!(params.stop, vec!["END".to_string()]);
    }
}
