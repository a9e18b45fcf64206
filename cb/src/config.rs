//! ctxbroker configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::blackboard::ErrorExitPolicy;

/// Main ctxbroker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run coordination defaults
    pub broker: BrokerConfig,

    /// Daemon transport settings
    pub daemon: DaemonConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: ./ctxbroker.yml
        let local_config = PathBuf::from("ctxbroker.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ctxbroker/ctxbroker.yml
        if let Some(user_config) = user_config_path()
            && user_config.exists()
        {
            match Self::load_from_file(&user_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed: a broken config is reported properly by
    /// [`Config::load`] once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => [Some(PathBuf::from("ctxbroker.yml")), user_config_path()]
                .into_iter()
                .flatten()
                .collect(),
        };
        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Config>(&content).ok())
            .and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ctxbroker").join("ctxbroker.yml"))
}

/// Run coordination defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Whether new runs accept data injections unless the creator says otherwise
    #[serde(rename = "allow-injections")]
    pub allow_injections: bool,

    /// How a member's error exit affects its dependents
    #[serde(rename = "error-exit-policy")]
    pub error_exit_policy: ErrorExitPolicy,

    /// Lifetime given to new runs; `None` keeps runs until destroyed
    #[serde(rename = "default-lifetime-secs")]
    pub default_lifetime_secs: Option<u64>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            allow_injections: true,
            error_exit_policy: ErrorExitPolicy::default(),
            default_lifetime_secs: None,
        }
    }
}

/// Daemon transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path; defaults to the runtime dir
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,

    /// Largest accepted request line in bytes
    #[serde(rename = "max-message-size")]
    pub max_message_size: usize,

    /// How often `retrieve --wait` polls
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// How often the daemon sweeps expired runs
    #[serde(rename = "expire-interval-secs")]
    pub expire_interval_secs: u64,

    /// Per-request timeout for clients, and for the daemon reading a request line
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            max_message_size: 64 * 1024,
            poll_interval_ms: 2000,
            expire_interval_secs: 60,
            timeout_ms: 5000,
        }
    }
}

impl DaemonConfig {
    /// Configured socket path, or the default one
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(crate::ipc::get_socket_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.broker.allow_injections);
        assert_eq!(config.broker.error_exit_policy, ErrorExitPolicy::Eager);
        assert_eq!(config.daemon.max_message_size, 64 * 1024);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
broker:
  allow-injections: false
  error-exit-policy: on-retrieve
  default-lifetime-secs: 3600

daemon:
  socket-path: /tmp/cb.sock
  max-message-size: 1024
  poll-interval-ms: 500

log-level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert!(!config.broker.allow_injections);
        assert_eq!(config.broker.error_exit_policy, ErrorExitPolicy::OnRetrieve);
        assert_eq!(config.broker.default_lifetime_secs, Some(3600));
        assert_eq!(config.daemon.socket_path(), PathBuf::from("/tmp/cb.sock"));
        assert_eq!(config.daemon.max_message_size, 1024);
        assert_eq!(config.daemon.poll_interval_ms, 500);
        assert_eq!(config.daemon.expire_interval_secs, 60);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
broker:
  error-exit-policy: ignore
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.broker.error_exit_policy, ErrorExitPolicy::Ignore);
        assert!(config.broker.allow_injections);
        assert_eq!(config.daemon.timeout_ms, 5000);
    }

    #[test]
    fn test_load_explicit_path_and_log_level() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ctxbroker.yml");
        fs::write(&path, "log-level: trace\nbroker:\n  allow-injections: false\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert!(!config.broker.allow_injections);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("trace"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }
}
