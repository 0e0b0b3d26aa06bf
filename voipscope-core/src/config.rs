//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/voipscope/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/voipscope/` (~/.config/voipscope/)
//! - Data: `$XDG_DATA_HOME/voipscope/` (~/.local/share/voipscope/)
//! - State/Logs: `$XDG_STATE_HOME/voipscope/` (~/.local/state/voipscope/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

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
    /// Call engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// External dissector/merge tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Call engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Mask SIP user parts (a***e@example.com) when building the index
    #[serde(default)]
    pub privacy_mask_user: bool,

    /// Codec label used for MOS estimation (e.g. "g711", "g729", "opus")
    #[serde(default = "default_codec")]
    pub default_codec: String,

    /// Directory holding capture files (defaults to `<data_dir>/captures`)
    pub capture_dir: Option<PathBuf>,

    /// Directory receiving per-call exports (defaults to `<data_dir>/exports`)
    pub export_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            privacy_mask_user: false,
            default_codec: default_codec(),
            capture_dir: None,
            export_dir: None,
        }
    }
}

impl EngineConfig {
    /// Capture directory, falling back to the XDG data directory.
    pub fn capture_dir(&self) -> PathBuf {
        self.capture_dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("captures"))
    }

    /// Export directory, falling back to the XDG data directory.
    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("exports"))
    }
}

fn default_codec() -> String {
    "g711".to_string()
}

/// External tool locations and limits
#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    /// tshark executable (name on PATH or absolute path)
    #[serde(default = "default_tshark")]
    pub tshark: PathBuf,

    /// mergecap executable (name on PATH or absolute path)
    #[serde(default = "default_mergecap")]
    pub mergecap: PathBuf,

    /// Timeout for field extraction runs, in seconds
    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_secs: u64,

    /// Timeout for each filter/merge step of an export, in seconds
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,

    /// Let the dissector detect RTP without SDP (`rtp.heuristic_rtp`)
    #[serde(default = "default_rtp_heuristics")]
    pub rtp_heuristics: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tshark: default_tshark(),
            mergecap: default_mergecap(),
            extract_timeout_secs: default_extract_timeout(),
            export_timeout_secs: default_export_timeout(),
            rtp_heuristics: default_rtp_heuristics(),
        }
    }
}

impl ToolsConfig {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs.max(1))
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs.max(1))
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.tshark.as_os_str().is_empty() {
            return Err(Error::Config("tools.tshark must not be empty".to_string()));
        }
        if self.mergecap.as_os_str().is_empty() {
            return Err(Error::Config(
                "tools.mergecap must not be empty".to_string(),
            ));
        }
        if self.extract_timeout_secs == 0 || self.export_timeout_secs == 0 {
            return Err(Error::Config(
                "tool timeouts must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_tshark() -> PathBuf {
    PathBuf::from("tshark")
}

fn default_mergecap() -> PathBuf {
    PathBuf::from("mergecap")
}

fn default_extract_timeout() -> u64 {
    90
}

fn default_export_timeout() -> u64 {
    120
}

fn default_rtp_heuristics() -> bool {
    true
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

    /// Level for tshark/mergecap runs and their parsing, if it should
    /// differ from `level`
    #[serde(default)]
    pub tool_level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            tool_level: None,
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

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.tools.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/voipscope/config.toml` (~/.config/voipscope/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("voipscope").join("config.toml")
    }

    /// Returns the data directory path (for the index database and exports)
    ///
    /// `$XDG_DATA_HOME/voipscope/` (~/.local/share/voipscope/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("voipscope")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/voipscope/` (~/.local/state/voipscope/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("voipscope")
    }

    /// Returns the index database file path
    ///
    /// `$XDG_DATA_HOME/voipscope/index.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("index.db")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
