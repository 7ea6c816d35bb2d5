//! CLI argument definitions for log2console-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Log2Console receiver host.
///
/// Starts every receiver listed in the configuration file and prints the
/// messages they deliver to stdout.
#[derive(Parser, Debug)]
#[command(name = "log2console-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the log2console.toml configuration file.
    #[arg(short, long, default_value = "log2console.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate the configuration, including every receiver entry, and exit.
    #[arg(long)]
    pub validate: bool,

    /// Print the available receiver types with a sample client configuration and exit.
    #[arg(long)]
    pub list_receivers: bool,
}
