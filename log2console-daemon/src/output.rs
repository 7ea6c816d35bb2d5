//! Message output.
//!
//! [`MessagePrinter`] is the funnel consumer: it renders every drained
//! message as one text line or one JSON object and writes it out.

use std::io::Write;

use anyhow::Result;
use log2console_core::config::{OutputConfig, validate_timestamp_format};
use log2console_core::message::LogMessage;
use log2console_receivers::MessageConsumer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

pub struct MessagePrinter<W> {
    format: OutputFormat,
    timestamp_format: String,
    out: W,
}

impl MessagePrinter<std::io::Stdout> {
    pub fn stdout(config: &OutputConfig) -> Result<Self> {
        Self::new(config, std::io::stdout())
    }
}

impl<W: Write> MessagePrinter<W> {
    pub fn new(config: &OutputConfig, out: W) -> Result<Self> {
        let format = match config.format.as_str() {
            "text" => OutputFormat::Text,
            "json" => OutputFormat::Json,
            other => {
                return Err(anyhow::anyhow!(
                    "unknown output format '{}', expected 'text' or 'json'",
                    other
                ));
            }
        };
        validate_timestamp_format(&config.timestamp_format)?;
        Ok(Self {
            format,
            timestamp_format: config.timestamp_format.clone(),
            out,
        })
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// One message, without the trailing newline.
    pub fn render(&self, msg: &LogMessage) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(msg).unwrap_or_else(|e| {
                format!("{{\"error\":\"unserializable message: {e}\"}}")
            }),
            OutputFormat::Text => {
                let mut line = format!(
                    "{} {:<5} [{}] {} - {}",
                    msg.timestamp.format(&self.timestamp_format),
                    msg.level.name(),
                    msg.thread_name,
                    msg.logger_name,
                    msg.message
                );
                if let Some(exception) = msg.exception.as_deref().filter(|e| !e.is_empty()) {
                    line.push('\n');
                    line.push_str(exception);
                }
                line
            }
        }
    }

    fn write_batch(&mut self, messages: &[LogMessage]) -> std::io::Result<()> {
        for msg in messages {
            let line = self.render(msg);
            writeln!(self.out, "{line}")?;
        }
        self.out.flush()
    }
}

impl<W: Write + Send> MessageConsumer for MessagePrinter<W> {
    fn consume(&mut self, messages: Vec<LogMessage>) {
        if let Err(e) = self.write_batch(&messages) {
            tracing::warn!(error = %e, count = messages.len(), "failed to write messages");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};
    use log2console_core::level::LogLevel;

    use super::*;

    fn sample() -> LogMessage {
        let mut msg = LogMessage::new("App.Core", LogLevel::Warn, "disk almost full");
        msg.thread_name = "7".to_owned();
        msg.timestamp = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        msg
    }

    #[test]
    fn text_line_layout() {
        let printer = MessagePrinter::new(&OutputConfig::default(), Vec::new()).unwrap();
        assert_eq!(
            printer.render(&sample()),
            "2024-03-01 12:30:45.000 Warn  [7] App.Core - disk almost full"
        );
    }

    #[test]
    fn exception_goes_on_the_next_line() {
        let printer = MessagePrinter::new(&OutputConfig::default(), Vec::new()).unwrap();
        let mut msg = sample();
        msg.exception = Some("System.IO.IOException: no space".to_owned());
        let line = printer.render(&msg);
        assert!(line.ends_with("\nSystem.IO.IOException: no space"));
    }

    #[test]
    fn json_is_one_object() {
        let config = OutputConfig {
            format: "json".to_owned(),
            ..OutputConfig::default()
        };
        let printer = MessagePrinter::new(&config, Vec::new()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&printer.render(&sample())).unwrap();
        assert_eq!(value["logger_name"], "App.Core");
        assert_eq!(value["message"], "disk almost full");
    }

    #[test]
    fn consume_writes_one_line_per_message() {
        let mut printer = MessagePrinter::new(&OutputConfig::default(), Vec::new()).unwrap();
        printer.consume(vec![sample(), sample()]);
        let out = String::from_utf8(printer.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad_format = OutputConfig {
            format: "yaml".to_owned(),
            ..OutputConfig::default()
        };
        assert!(MessagePrinter::new(&bad_format, Vec::new()).is_err());

        let bad_timestamp = OutputConfig {
            timestamp_format: "%Q".to_owned(),
            ..OutputConfig::default()
        };
        assert!(MessagePrinter::new(&bad_timestamp, Vec::new()).is_err());
    }
}
