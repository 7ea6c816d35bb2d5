//! Serilog-style structured JSON parser.
//!
//! Input is one flat JSON object:
//!
//! ```json
//! {"timestamp":"2024-01-01T00:00:00Z","level":"Information","message":"hi","sourceContext":"X.Y","extra":"42"}
//! ```
//!
//! `timestamp`, `level`, `message` and `sourceContext` map onto the message
//! model. Every other key is kept as a property and also appended to the
//! message text as `\nkey:value`, in document order.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde_json::Value;

use log2console_core::level::LogLevel;
use log2console_core::message::LogMessage;

use super::FORMAT_SERILOG;
use crate::error::ReceiverError;

/// Serilog level names, positionally mapped onto Trace..Fatal.
pub const SERILOG_LEVELS: [&str; 6] = [
    "Verbose",
    "Debug",
    "Information",
    "Warning",
    "Error",
    "Fatal",
];

/// Thread name used by degraded JSON messages.
const NO_THREAD: &str = "N/A";

/// Maps a Serilog level name to a rank; unknown names give the sentinel.
pub fn level_from_serilog(name: &str) -> LogLevel {
    SERILOG_LEVELS
        .iter()
        .position(|l| *l == name)
        .map_or(LogLevel::None, LogLevel::from_index)
}

/// Parses one JSON event.
pub fn parse_event(text: &str, default_logger: &str) -> Result<LogMessage, ReceiverError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ReceiverError::parse(FORMAT_SERILOG, e))?;
    let Value::Object(object) = value else {
        return Err(ReceiverError::parse(
            FORMAT_SERILOG,
            "expected a JSON object at the top level",
        ));
    };

    let mut msg = LogMessage::default();
    msg.set_logger(default_logger);
    let mut extras = String::new();

    for (key, value) in object {
        match key.as_str() {
            "timestamp" => msg.timestamp = parse_timestamp(&value_text(&value))?,
            "level" => msg.level = level_from_serilog(&value_text(&value)),
            "message" => msg.message = value_text(&value),
            "sourceContext" => msg.set_logger(value_text(&value)),
            _ => {
                let text = value_text(&value);
                extras.push('\n');
                extras.push_str(&key);
                extras.push(':');
                extras.push_str(&text);
                msg.properties.insert(key, text);
            }
        }
    }
    msg.message.push_str(&extras);
    Ok(msg)
}

/// Parses one JSON event, degrading to a raw-text message on failure.
pub fn parse_or_degrade(text: &str, default_logger: &str) -> LogMessage {
    match parse_event(text, default_logger) {
        Ok(msg) => msg,
        Err(e) => {
            super::record_parse_error(FORMAT_SERILOG);
            tracing::debug!(error = %e, "degrading malformed JSON event");
            let mut msg = LogMessage::degraded(text, default_logger, e);
            msg.thread_name = NO_THREAD.to_owned();
            msg
        }
    }
}

/// Strings verbatim, everything else as compact JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accepts RFC 3339 with an offset, or a bare ISO-8601 date-time read as
/// local time.
fn parse_timestamp(text: &str) -> Result<DateTime<Local>, ReceiverError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| ReceiverError::parse(FORMAT_SERILOG, format!("timestamp '{text}': {e}")))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ReceiverError::parse(FORMAT_SERILOG, format!("timestamp '{text}' does not exist locally")))
}
