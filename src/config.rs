//! Rundown controller configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PLAYOUT_CONFIG or --config)
//! 3. Environment variables

use playout_client::{ConnectionConfig, Endpoint};
use playout_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playout servers.
    pub devices: Vec<DeviceConfig>,
    /// Connection timings shared by every device.
    pub connection: ConnectionSettings,
    /// Playout behaviour.
    pub playout: PlayoutConfig,
}

impl Config {
    /// Loads configuration from `path`, or from PLAYOUT_CONFIG when no path is
    /// given, then applies environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PLAYOUT_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.connection.apply_env_overrides();
        self.playout.apply_env_overrides();
    }

    /// Checks that device names are present and unique.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "device name must not be empty".to_string(),
                ));
            }
            if device.address.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "device '{}' has no address",
                    device.name
                )));
            }
            if !seen.insert(device.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
        }
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

/// One playout server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shadow devices receive a copy of every rundown action.
    #[serde(default)]
    pub shadow: bool,
    /// Video format of each channel, first entry is channel 1.
    #[serde(default)]
    pub channel_formats: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl DeviceConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.port)
    }

    /// Frame rate of a channel, from its configured video format.
    pub fn frames_per_second(&self, channel: u32) -> Option<f64> {
        let index = usize::try_from(channel).ok()?.checked_sub(1)?;
        self.channel_formats
            .get(index)
            .and_then(|format| format_frame_rate(format))
    }
}

/// Frame rate of a video format name such as `1080i5000` or `720p5994`.
///
/// The digits are the field rate times 100; interlaced formats carry two
/// fields per frame.
pub fn format_frame_rate(format: &str) -> Option<f64> {
    match format.to_ascii_uppercase().as_str() {
        "PAL" => return Some(25.0),
        "NTSC" => return Some(30000.0 / 1001.0),
        _ => {}
    }

    let lower = format.to_ascii_lowercase();
    let split = lower.find(['p', 'i'])?;
    let (resolution, rest) = lower.split_at(split);
    if resolution.is_empty() || !resolution.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (scan, digits) = rest.split_at(1);
    let rate: u32 = digits.parse().ok()?;
    if rate == 0 {
        return None;
    }

    let rate = match rate {
        2398 => 24000.0 / 1001.0,
        2997 => 30000.0 / 1001.0,
        5994 => 60000.0 / 1001.0,
        r => f64::from(r) / 100.0,
    };
    Some(if scan == "i" { rate / 2.0 } else { rate })
}

/// Connection timings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    /// Keepalive probe interval (0 = disabled).
    pub keepalive_ms: u64,
    /// How long a caller waits for a response (0 = forever).
    pub request_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_interval_ms: 5_000,
            keepalive_ms: 0,
            request_timeout_ms: 3_000,
        }
    }
}

impl ConnectionSettings {
    fn apply_env_overrides(&mut self) {
        if let Ok(ms) = std::env::var("PLAYOUT_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("PLAYOUT_RECONNECT_MS") {
            if let Ok(ms) = ms.parse() {
                self.reconnect_interval_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("PLAYOUT_KEEPALIVE_MS") {
            if let Ok(ms) = ms.parse() {
                self.keepalive_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("PLAYOUT_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                self.request_timeout_ms = ms;
            }
        }
    }

    /// Builds the per-connection configuration.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new()
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_reconnect_interval(Duration::from_millis(self.reconnect_interval_ms));
        if self.keepalive_ms > 0 {
            config = config.with_keepalive(Duration::from_millis(self.keepalive_ms));
        }
        if self.request_timeout_ms > 0 {
            config = config.with_request_timeout(Duration::from_millis(self.request_timeout_ms));
        }
        config
    }
}

/// Unit of a rundown item's delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayType {
    #[default]
    Milliseconds,
    Frames,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayoutConfig {
    pub delay_type: DelayType,
}

impl PlayoutConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(kind) = std::env::var("PLAYOUT_DELAY_TYPE") {
            match kind.to_lowercase().as_str() {
                "milliseconds" | "ms" => self.delay_type = DelayType::Milliseconds,
                "frames" => self.delay_type = DelayType::Frames,
                other => tracing::warn!("ignoring PLAYOUT_DELAY_TYPE={}", other),
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {1}", .0.display())]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse '{}': {1}", .0.display())]
    ParseError(PathBuf, String),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}
