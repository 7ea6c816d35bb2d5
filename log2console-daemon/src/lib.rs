//! Log2Console daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `log2console-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod host;
pub mod logging;
pub mod metrics_server;
pub mod output;
