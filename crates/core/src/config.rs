//! Configuration: parsing `log2console.toml` and runtime settings.
//!
//! [`Log2ConsoleConfig`] is the top-level structure. Receiver sections are
//! kept as untyped JSON blobs and only interpreted by the receiver registry,
//! so this crate does not need to know every receiver type.
//!
//! # Precedence
//! 1. CLI arguments (highest)
//! 2. Environment variables (`L2C_FUNNEL_CAPACITY=5000`)
//! 3. Config file (`log2console.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), log2console_core::error::Log2ConsoleError> {
//! use log2console_core::config::Log2ConsoleConfig;
//!
//! let config = Log2ConsoleConfig::load("log2console.toml").await?;
//!
//! let config = Log2ConsoleConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, Log2ConsoleError};

/// Longest allowed funnel drain interval.
pub const MAX_DRAIN_INTERVAL_MS: u64 = 60_000;

/// Log2Console configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Log2ConsoleConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub funnel: FunnelConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// `[[receivers]]` entries in declaration order
    #[serde(default)]
    pub receivers: Vec<ReceiverEntry>,
}

impl Log2ConsoleConfig {
    /// Loads the file, applies environment overrides and validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Log2ConsoleError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads the file without environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, Log2ConsoleError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Log2ConsoleError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                Log2ConsoleError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(toml_str: &str) -> Result<Self, Log2ConsoleError> {
        toml::from_str(toml_str).map_err(|e| {
            Log2ConsoleError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `L2C_{SECTION}_{FIELD}` environment variables.
    ///
    /// Receiver entries are not overridable from the environment.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "L2C_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "L2C_GENERAL_LOG_FORMAT");

        override_u64(
            &mut self.funnel.drain_interval_ms,
            "L2C_FUNNEL_DRAIN_INTERVAL_MS",
        );
        override_usize(&mut self.funnel.capacity, "L2C_FUNNEL_CAPACITY");
        override_parsed(&mut self.funnel.drop_policy, "L2C_FUNNEL_DROP_POLICY");

        override_string(&mut self.output.format, "L2C_OUTPUT_FORMAT");
        override_string(
            &mut self.output.timestamp_format,
            "L2C_OUTPUT_TIMESTAMP_FORMAT",
        );

        override_bool(&mut self.metrics.enabled, "L2C_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "L2C_METRICS_LISTEN_ADDR");
        override_parsed(&mut self.metrics.port, "L2C_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "L2C_METRICS_ENDPOINT");
    }

    pub fn validate(&self) -> Result<(), Log2ConsoleError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            )
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            )
            .into());
        }

        if self.funnel.capacity == 0 {
            return Err(ConfigError::invalid("funnel.capacity", "must be greater than 0").into());
        }
        if self.funnel.drain_interval_ms == 0
            || self.funnel.drain_interval_ms > MAX_DRAIN_INTERVAL_MS
        {
            return Err(ConfigError::invalid(
                "funnel.drain_interval_ms",
                format!("must be between 1 and {MAX_DRAIN_INTERVAL_MS}"),
            )
            .into());
        }

        let valid_outputs = ["text", "json"];
        if !valid_outputs.contains(&self.output.format.as_str()) {
            return Err(ConfigError::invalid(
                "output.format",
                format!("must be one of: {}", valid_outputs.join(", ")),
            )
            .into());
        }
        validate_timestamp_format(&self.output.timestamp_format)?;

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::invalid("metrics.port", "must not be 0").into());
        }

        for (idx, entry) in self.receivers.iter().enumerate() {
            if entry.kind.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("receivers[{idx}].type"),
                    "must not be empty",
                )
                .into());
            }
        }

        Ok(())
    }
}

/// Rejects strftime strings chrono cannot render.
pub fn validate_timestamp_format(format: &str) -> Result<(), ConfigError> {
    if format.is_empty() {
        return Err(ConfigError::invalid(
            "output.timestamp_format",
            "must not be empty",
        ));
    }
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(ConfigError::invalid(
            "output.timestamp_format",
            format!("'{format}' is not a valid strftime format"),
        ));
    }
    Ok(())
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Diagnostic log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Diagnostic log format (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// Notification funnel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunnelConfig {
    /// Consumer drain period
    pub drain_interval_ms: u64,
    /// Maximum messages held between drains
    pub capacity: usize,
    /// What to drop once `capacity` is reached
    pub drop_policy: DropPolicy,
}

impl Default for FunnelConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: 100,
            capacity: 100_000,
            drop_policy: DropPolicy::Oldest,
        }
    }
}

/// Overflow policy for bounded queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPolicy {
    /// Evict the oldest queued entry
    #[default]
    Oldest,
    /// Reject the incoming entry
    Newest,
}

impl fmt::Display for DropPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oldest => write!(f, "oldest"),
            Self::Newest => write!(f, "newest"),
        }
    }
}

impl FromStr for DropPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "oldest" => Ok(Self::Oldest),
            "newest" => Ok(Self::Newest),
            other => Err(ConfigError::invalid(
                "drop_policy",
                format!("'{other}' is not one of: oldest, newest"),
            )),
        }
    }
}

/// Host output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// `text` or `json` (one message per line)
    pub format: String,
    /// chrono strftime pattern for the text format
    pub timestamp_format: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "text".to_owned(),
            timestamp_format: "%Y-%m-%d %H:%M:%S%.3f".to_owned(),
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// One `[[receivers]]` table.
///
/// `type` selects the registry entry; every other key is handed to that
/// receiver's constructor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl ReceiverEntry {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            settings: serde_json::Map::new(),
        }
    }

    /// Settings blob as a JSON object.
    pub fn settings_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.settings.clone())
    }
}

fn default_true() -> bool {
    true
}

// --- environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_parsed<T: FromStr>(target: &mut T, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}
