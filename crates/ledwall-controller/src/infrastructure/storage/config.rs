//! TOML controller configuration.
//!
//! Every field has a serde default so a missing or partial file yields a
//! working controller; the file is created on first save.  The path comes
//! from the `LEDWALL_CONFIG` environment variable or defaults to
//! `ledwall.toml` in the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level controller configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ControllerConfig {
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub controller: GeneralConfig,
}

/// Logical canvas and output cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Color painted for an area whose plugin failed.
    #[serde(default = "default_fallback_color")]
    pub fallback_color: String,
}

/// SDK command server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Card link settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// How long to wait for a card ack before marking it degraded.
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Reconnect backoff ceiling.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

/// Directory layout for programs, media, and staging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl StorageConfig {
    pub fn programs_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("programs")
    }

    pub fn media_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("media")
    }

    pub fn staging_dir(&self) -> PathBuf {
        Path::new(&self.data_dir).join("staging")
    }

    pub fn hwconfig_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("hwconfig.toml")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    /// `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_width() -> u32 {
    128
}
fn default_height() -> u32 {
    64
}
fn default_fps() -> u32 {
    30
}
fn default_fallback_color() -> String {
    "#000000".to_string()
}
fn default_port() -> u16 {
    10001
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_device() -> String {
    "/dev/ttyS1".to_string()
}
fn default_baud() -> u32 {
    115_200
}
fn default_ack_timeout_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    8_000
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_device_name() -> String {
    "ledwall".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            fallback_color: default_fallback_color(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            baud: default_baud(),
            ack_timeout_ms: default_ack_timeout_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            device_name: default_device_name(),
        }
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

/// Config path: `LEDWALL_CONFIG` or `ledwall.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os("LEDWALL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ledwall.toml"))
}

/// Loads the config, returning defaults if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ControllerConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ControllerConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists the config, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Serialize`].
pub fn save_config(path: &Path, config: &ControllerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
