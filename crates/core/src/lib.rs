//! Log2Console core: the canonical log message model, log levels, the sink
//! contract receivers deliver into, shared errors and configuration.

pub mod config;
pub mod error;
pub mod level;
pub mod message;
pub mod metrics;
pub mod sink;

pub use error::{ConfigError, LifecycleError, Log2ConsoleError, ParseError};

pub use config::{DropPolicy, Log2ConsoleConfig, ReceiverEntry};

pub use level::{Color, LevelInfo, LevelTable, LogLevel};
pub use message::{LogMessage, UNKNOWN_LOGGER};

pub use sink::LogMessageSink;
