//! Wire-format parsers.
//!
//! - [`log4j`]: log4j / NLog XML events, plus [`Log4jEventCodec`] for
//!   framing them out of a byte stream
//! - [`serilog`]: Serilog-style flat JSON objects
//!
//! Both parsers have a strict `parse_event` entry point and a
//! `parse_or_degrade` entry point that never fails: malformed input comes
//! back as a message carrying the raw text and the parse error.

pub mod codec;
pub mod log4j;
pub mod serilog;

pub use codec::Log4jEventCodec;

use serde::{Deserialize, Serialize};

use log2console_core::message::LogMessage;
use log2console_core::metrics as m;

/// Metric label / error tag for log4j XML.
pub const FORMAT_LOG4J: &str = "log4j_xml";

/// Metric label / error tag for Serilog JSON.
pub const FORMAT_SERILOG: &str = "serilog_json";

/// Payload format a receiver expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    #[serde(alias = "xml", alias = "log4j")]
    Log4jXml,
    #[serde(alias = "json", alias = "serilog")]
    SerilogJson,
}

impl WireFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Log4jXml => FORMAT_LOG4J,
            Self::SerilogJson => FORMAT_SERILOG,
        }
    }

    /// Parses one complete event, degrading on failure.
    pub fn parse_or_degrade(self, text: &str, default_logger: &str) -> LogMessage {
        match self {
            Self::Log4jXml => log4j::parse_or_degrade(text, default_logger),
            Self::SerilogJson => serilog::parse_or_degrade(text, default_logger),
        }
    }
}

pub(crate) fn record_parse_error(format: &'static str) {
    metrics::counter!(m::RECEIVER_PARSE_ERRORS_TOTAL, m::LABEL_FORMAT => format).increment(1);
}
