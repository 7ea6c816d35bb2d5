//! Diagnostics for the daemon itself.
//!
//! Received log messages go to stdout through the console output; the
//! daemon's own tracing goes to stderr. The filter comes from, in order:
//! `L2C_LOG`, `RUST_LOG`, then `[general] log_level`. A filter taken from
//! the config also keeps the HTTP and WebSocket stacks at `warn`.

use std::str::FromStr;

use anyhow::{Context, Result, bail};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use log2console_core::config::GeneralConfig;

/// Daemon-specific filter override.
pub const FILTER_ENV: &str = "L2C_LOG";

const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "tungstenite=warn", "notify=warn"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Multi-line, colored
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
        }
    }
}

/// Builds the filter from the first source that is set.
fn build_filter(level: &str, l2c_log: Option<&str>, rust_log: Option<&str>) -> Result<EnvFilter> {
    if let Some(directives) = l2c_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directives).with_context(|| format!("invalid {FILTER_ENV}"));
    }
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        return EnvFilter::try_new(directives).context("invalid RUST_LOG");
    }
    let mut directives = vec![level];
    directives.extend_from_slice(QUIET_DEPENDENCIES);
    EnvFilter::try_new(directives.join(","))
        .with_context(|| format!("invalid general.log_level '{level}'"))
}

/// Installs the global subscriber. Call once, before anything logs.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format: LogFormat = config.log_format.parse()?;
    let filter = build_filter(
        &config.log_level,
        std::env::var(FILTER_ENV).ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    )?;

    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let output = match format {
        LogFormat::Json => fmt.json().boxed(),
        LogFormat::Pretty => fmt.pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .with_context(|| format!("failed to initialize {format:?} tracing subscriber"))
}
