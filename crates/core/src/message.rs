//! Canonical log message.
//!
//! Every receiver, whatever its wire format, produces [`LogMessage`] values.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::level::LogLevel;

/// Placeholder logger name used when the source did not supply one.
pub const UNKNOWN_LOGGER: &str = "Unknown";

/// Thread name used for messages that did not come with one.
pub const NO_THREAD: &str = "NA";

/// One normalized log event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Sender-assigned sequence number, 0 when absent
    pub sequence_nr: u64,
    /// Event time in the local time zone
    pub timestamp: DateTime<Local>,
    /// Full dotted logger name, possibly rewritten by the receiver
    pub logger_name: String,
    /// Grouping key for the logger tree
    pub root_logger_name: String,
    pub level: LogLevel,
    pub message: String,
    pub thread_name: String,
    pub exception: Option<String>,
    pub call_site_class: String,
    pub call_site_method: String,
    pub source_file_name: String,
    pub source_file_line_nr: u32,
    pub properties: HashMap<String, String>,
}

impl Default for LogMessage {
    fn default() -> Self {
        Self {
            sequence_nr: 0,
            timestamp: Local::now(),
            logger_name: UNKNOWN_LOGGER.to_owned(),
            root_logger_name: UNKNOWN_LOGGER.to_owned(),
            level: LogLevel::None,
            message: String::new(),
            thread_name: String::new(),
            exception: None,
            call_site_class: String::new(),
            call_site_method: String::new(),
            source_file_name: String::new(),
            source_file_line_nr: 0,
            properties: HashMap::new(),
        }
    }
}

impl LogMessage {
    /// Creates a message stamped with the current time.
    ///
    /// The root logger is the first dotted segment of `logger`.
    pub fn new(logger: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        let mut msg = Self {
            level,
            message: message.into(),
            ..Self::default()
        };
        msg.set_logger(logger);
        msg
    }

    /// Builds the fallback message for input that failed to parse.
    ///
    /// The raw text is kept as the message body and the parse error goes
    /// into the exception field, so nothing the sender wrote is lost.
    pub fn degraded(raw: &str, default_logger: &str, error: impl fmt::Display) -> Self {
        Self {
            logger_name: default_logger.to_owned(),
            root_logger_name: default_logger.to_owned(),
            level: LogLevel::Info,
            message: raw.to_owned(),
            thread_name: NO_THREAD.to_owned(),
            exception: Some(error.to_string()),
            ..Self::default()
        }
    }

    /// Sets the logger name and derives the root from its first segment.
    ///
    /// An empty name falls back to [`UNKNOWN_LOGGER`].
    pub fn set_logger(&mut self, logger: impl Into<String>) {
        let logger = logger.into();
        self.logger_name = if logger.is_empty() {
            UNKNOWN_LOGGER.to_owned()
        } else {
            logger
        };
        self.root_logger_name = root_segment(&self.logger_name).to_owned();
    }

    /// Moves the current logger name into the root slot and replaces the
    /// logger with `logger`.
    ///
    /// Receivers use this to group every sender under one root while keeping
    /// the sender's own logger name in the full name.
    pub fn rebase(&mut self, root: impl Into<String>, logger: impl Into<String>) {
        self.root_logger_name = root.into();
        self.logger_name = logger.into();
    }

    /// Returns `true` when the message carries a stack trace or exception text.
    pub fn has_exception(&self) -> bool {
        self.exception.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// First dotted segment of a logger name.
pub fn root_segment(logger: &str) -> &str {
    logger.split('.').next().unwrap_or(logger)
}

impl fmt::Display for LogMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} {}",
            self.level, self.thread_name, self.logger_name, self.message
        )?;
        if let Some(exception) = self.exception.as_deref().filter(|e| !e.is_empty()) {
            write!(f, "\n{exception}")?;
        }
        Ok(())
    }
}
