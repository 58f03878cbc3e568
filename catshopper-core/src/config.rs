//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/catshopper/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/catshopper/` (~/.config/catshopper/)
//! - Data: `$XDG_DATA_HOME/catshopper/` (~/.local/share/catshopper/)
//! - State/Logs: `$XDG_STATE_HOME/catshopper/` (~/.local/state/catshopper/)
//!
//! The backend base URL can be overridden with `CATSHOPPER_API_URL`.

use crate::error::{Error, Result};
use crate::types::ApiProvider;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `api.base_url`
pub const API_URL_ENV: &str = "CATSHOPPER_API_URL";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Backend API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Orchestration and polling configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Generation backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Backend base URL (e.g., `http://localhost:8000`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Timeout for the health probe in seconds
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,

    /// Path of the script generation endpoint
    #[serde(default = "default_script_endpoint")]
    pub script_endpoint: String,

    /// Provider used when no preference has been stored
    #[serde(default)]
    pub provider: ApiProvider,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            status_timeout_secs: default_status_timeout(),
            script_endpoint: default_script_endpoint(),
            provider: ApiProvider::default(),
        }
    }
}

impl ApiConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if !self.script_endpoint.starts_with('/') {
            return Err(Error::Config(
                "api.script_endpoint must start with '/'".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.status_timeout_secs == 0 {
            return Err(Error::Config("api timeouts must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_status_timeout() -> u64 {
    5
}

fn default_script_endpoint() -> String {
    "/scripts/generate".to_string()
}

/// Orchestrator and job poller tuning
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Pause between episodes in batch generation
    #[serde(default = "default_inter_episode_delay")]
    pub inter_episode_delay_ms: u64,

    /// Interval between job status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum total time a job may be polled
    #[serde(default = "default_max_poll")]
    pub max_poll_secs: u64,

    /// Consecutive failed polls tolerated before the job is failed
    #[serde(default = "default_max_poll_errors")]
    pub max_poll_errors: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inter_episode_delay_ms: default_inter_episode_delay(),
            poll_interval_ms: default_poll_interval(),
            max_poll_secs: default_max_poll(),
            max_poll_errors: default_max_poll_errors(),
        }
    }
}

impl PipelineConfig {
    pub fn inter_episode_delay(&self) -> Duration {
        Duration::from_millis(self.inter_episode_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Duration {
        Duration::from_secs(self.max_poll_secs)
    }
}

fn default_inter_episode_delay() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_poll() -> u64 {
    600
}

fn default_max_poll_errors() -> u32 {
    5
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env();
        config.api.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/catshopper/config.toml` (~/.config/catshopper/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("catshopper").join("config.toml")
    }

    /// Returns the data directory path (for the local store)
    ///
    /// `$XDG_DATA_HOME/catshopper/` (~/.local/share/catshopper/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("catshopper")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/catshopper/` (~/.local/state/catshopper/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("catshopper")
    }

    /// Returns the local store file path
    ///
    /// `$XDG_DATA_HOME/catshopper/store.db` (~/.local/share/catshopper/store.db)
    pub fn store_path() -> PathBuf {
        Self::data_dir().join("store.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/catshopper/catshopper.log` (~/.local/state/catshopper/catshopper.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("catshopper.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8000");
        assert_eq!(config.api.status_timeout_secs, 5);
        assert_eq!(config.api.provider, ApiProvider::OpenAI);
        assert_eq!(config.pipeline.poll_interval_ms, 2000);
        assert_eq!(config.pipeline.inter_episode_delay_ms, 500);
        assert_eq!(config.logging.level, "info");
        assert!(config.api.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[api]
base_url = "https://cats.example.com"
script_endpoint = "/content/generate-script"
provider = "huggingface"

[pipeline]
poll_interval_ms = 250
max_poll_secs = 30

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.api.base_url, "https://cats.example.com");
        assert_eq!(config.api.script_endpoint, "/content/generate-script");
        assert_eq!(config.api.provider, ApiProvider::HuggingFace);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.pipeline.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.pipeline.max_poll_duration(), Duration::from_secs(30));
        assert_eq!(config.pipeline.max_poll_errors, 5);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_api_config_validation() {
        let config = ApiConfig {
            base_url: "localhost:8000".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ApiConfig {
            script_endpoint: "scripts/generate".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ApiConfig {
            status_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_and_log_paths() {
        assert!(Config::store_path().ends_with("catshopper/store.db"));
        assert!(Config::log_path().ends_with("catshopper/catshopper.log"));
    }
}
