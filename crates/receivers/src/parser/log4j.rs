//! log4j / NLog XML event parser.
//!
//! One event is one `log4j:event` element:
//!
//! ```xml
//! <log4j:event logger="App.Orders" level="ERROR" thread="7" timestamp="1184286222308">
//!   <log4j:message>Order failed</log4j:message>
//!   <log4j:throwable>System.Exception: ...</log4j:throwable>
//!   <log4j:locationInfo class="App.Orders" method="Submit" file="Orders.cs" line="42"/>
//!   <log4j:properties>
//!     <log4j:data name="log4net:HostName" value="web-01"/>
//!   </log4j:properties>
//!   <nlog:eventSequenceNumber>17</nlog:eventSequenceNumber>
//! </log4j:event>
//! ```
//!
//! Namespace prefixes are matched literally; fragments rarely declare them.

use chrono::{DateTime, Local};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use log2console_core::level::LogLevel;
use log2console_core::message::LogMessage;

use super::FORMAT_LOG4J;
use crate::error::ReceiverError;

/// Root element name of a log4j event.
pub const LOG4J_EVENT: &str = "log4j:event";

const NOT_A_LOG4J_BLOCK: &str = "The Log Event is not a valid log4j Xml block.";

/// Property name whose value is treated as exception text.
const EXCEPTIONS_PROPERTY: &str = "exceptions";

/// Text-bearing children whose content we collect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Message,
    Throwable,
    SequenceNumber,
}

/// Parses one event fragment.
///
/// A missing `logger` attribute falls back to `default_logger`. Bad numeric
/// attributes (timestamp, line, sequence number) are ignored rather than
/// rejected.
pub fn parse_event(fragment: &str, default_logger: &str) -> Result<LogMessage, ReceiverError> {
    let mut reader = Reader::from_str(fragment);

    let mut msg = LogMessage::default();
    msg.set_logger(default_logger);

    let mut depth = 0usize;
    let mut root_seen = false;
    let mut in_properties = false;
    let mut field: Option<TextField> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                if !root_seen {
                    open_root(&e, &mut msg, default_logger)?;
                    root_seen = true;
                } else {
                    open_child(&e, &mut msg, &mut in_properties, &mut field, &mut text)?;
                }
                depth += 1;
            }
            Event::Empty(e) => {
                if !root_seen {
                    open_root(&e, &mut msg, default_logger)?;
                    return Ok(msg);
                }
                open_child(&e, &mut msg, &mut in_properties, &mut field, &mut text)?;
                // a self-closing text element carries empty content
                if let Some(f) = field.take() {
                    apply_text(&mut msg, f, "");
                }
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(msg);
                }
                if let Some(f) = field.take() {
                    apply_text(&mut msg, f, &text);
                    text.clear();
                }
                if is_properties(e.name().as_ref()) {
                    in_properties = false;
                }
            }
            Event::Text(t) => {
                let content = t.unescape().map_err(xml_error)?;
                if !root_seen {
                    if !content.trim().is_empty() {
                        return Err(ReceiverError::parse(FORMAT_LOG4J, NOT_A_LOG4J_BLOCK));
                    }
                } else if field.is_some() {
                    text.push_str(&content);
                }
            }
            Event::CData(c) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => {
                let reason = if root_seen {
                    "unexpected end of input: log4j:event is not closed"
                } else {
                    NOT_A_LOG4J_BLOCK
                };
                return Err(ReceiverError::parse(FORMAT_LOG4J, reason));
            }
            // declarations, comments, processing instructions
            _ => {}
        }
    }
}

/// Parses one event, degrading to a raw-text message on any failure.
pub fn parse_or_degrade(fragment: &str, default_logger: &str) -> LogMessage {
    match parse_event(fragment, default_logger) {
        Ok(msg) => msg,
        Err(e) => {
            super::record_parse_error(FORMAT_LOG4J);
            tracing::debug!(error = %e, "degrading malformed log4j event");
            LogMessage::degraded(fragment, default_logger, parse_reason(&e))
        }
    }
}

fn parse_reason(err: &ReceiverError) -> String {
    match err {
        ReceiverError::Parse { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

fn open_root(
    e: &BytesStart<'_>,
    msg: &mut LogMessage,
    default_logger: &str,
) -> Result<(), ReceiverError> {
    if e.name().as_ref() != LOG4J_EVENT.as_bytes() {
        return Err(ReceiverError::parse(FORMAT_LOG4J, NOT_A_LOG4J_BLOCK));
    }

    let logger = attribute(e, b"logger")?.filter(|l| !l.is_empty());
    msg.set_logger(logger.unwrap_or_else(|| default_logger.to_owned()));
    msg.level = attribute(e, b"level")?
        .map(|l| LogLevel::from_name(&l))
        .unwrap_or(LogLevel::None);
    msg.thread_name = attribute(e, b"thread")?.unwrap_or_default();
    if let Some(timestamp) = attribute(e, b"timestamp")?
        .and_then(|t| t.trim().parse::<i64>().ok())
        .and_then(from_unix_millis)
    {
        msg.timestamp = timestamp;
    }
    Ok(())
}

fn open_child(
    e: &BytesStart<'_>,
    msg: &mut LogMessage,
    in_properties: &mut bool,
    field: &mut Option<TextField>,
    text: &mut String,
) -> Result<(), ReceiverError> {
    let name = e.name();
    let name = name.as_ref();

    if *in_properties && e.local_name().as_ref() == b"data" {
        let key = attribute(e, b"name")?;
        let value = attribute(e, b"value")?.unwrap_or_default();
        match key {
            Some(key) if key.eq_ignore_ascii_case(EXCEPTIONS_PROPERTY) => {
                msg.exception = Some(value);
            }
            Some(key) => {
                msg.properties.insert(key, value);
            }
            None => {}
        }
        return Ok(());
    }

    match name {
        b"log4j:message" => *field = Some(TextField::Message),
        b"log4j:throwable" => *field = Some(TextField::Throwable),
        b"nlog:eventSequenceNumber" => *field = Some(TextField::SequenceNumber),
        b"log4j:locationInfo" => {
            msg.call_site_class = attribute(e, b"class")?.unwrap_or_default();
            msg.call_site_method = attribute(e, b"method")?.unwrap_or_default();
            msg.source_file_name = attribute(e, b"file")?.unwrap_or_default();
            if let Some(line) = attribute(e, b"line")?.and_then(|l| l.trim().parse::<u32>().ok()) {
                msg.source_file_line_nr = line;
            }
        }
        n if is_properties(n) => *in_properties = true,
        _ => {}
    }
    if field.is_some() {
        text.clear();
    }
    Ok(())
}

fn apply_text(msg: &mut LogMessage, field: TextField, text: &str) {
    match field {
        TextField::Message => msg.message = text.to_owned(),
        TextField::Throwable => msg.exception = Some(text.to_owned()),
        TextField::SequenceNumber => {
            if let Ok(seq) = text.trim().parse::<u64>() {
                msg.sequence_nr = seq;
            }
        }
    }
}

fn is_properties(name: &[u8]) -> bool {
    name == b"log4j:properties" || name == b"nlog:properties"
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ReceiverError> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value().map_err(xml_error)?.into_owned()));
        }
    }
    Ok(None)
}

/// Converts milliseconds since the Unix epoch (UTC) to local time.
pub fn from_unix_millis(millis: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp_millis(millis).map(|t| t.with_timezone(&Local))
}

fn xml_error(e: impl std::fmt::Display) -> ReceiverError {
    ReceiverError::parse(FORMAT_LOG4J, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_EVENT: &str = r#"<log4j:event logger="App.Orders.Service" level="ERROR" thread="7" timestamp="1184286222308">
  <log4j:message>Order &lt;42&gt; failed</log4j:message>
  <log4j:throwable><![CDATA[System.Exception: boom
   at Orders.Submit()]]></log4j:throwable>
  <log4j:locationInfo class="App.Orders.Service" method="Submit" file="Orders.cs" line="42"/>
  <log4j:properties>
    <log4j:data name="log4net:HostName" value="web-01"/>
    <log4j:data name="log4japp" value="Orders.exe"/>
  </log4j:properties>
  <nlog:eventSequenceNumber>17</nlog:eventSequenceNumber>
</log4j:event>"#;

    #[test]
    fn parses_every_field() {
        let msg = parse_event(FULL_EVENT, "TcpLogger").unwrap();
        assert_eq!(msg.logger_name, "App.Orders.Service");
        assert_eq!(msg.root_logger_name, "App");
        assert_eq!(msg.level, LogLevel::Error);
        assert_eq!(msg.thread_name, "7");
        assert_eq!(msg.message, "Order <42> failed");
        assert_eq!(
            msg.exception.as_deref(),
            Some("System.Exception: boom\n   at Orders.Submit()")
        );
        assert_eq!(msg.call_site_class, "App.Orders.Service");
        assert_eq!(msg.call_site_method, "Submit");
        assert_eq!(msg.source_file_name, "Orders.cs");
        assert_eq!(msg.source_file_line_nr, 42);
        assert_eq!(msg.properties["log4net:HostName"], "web-01");
        assert_eq!(msg.properties["log4japp"], "Orders.exe");
        assert_eq!(msg.sequence_nr, 17);
        assert_eq!(msg.timestamp.timestamp_millis(), 1_184_286_222_308);
    }

    #[test]
    fn missing_logger_uses_default() {
        let msg = parse_event(
            r#"<log4j:event level="INFO"><log4j:message>hi</log4j:message></log4j:event>"#,
            "UdpLogger",
        )
        .unwrap();
        assert_eq!(msg.logger_name, "UdpLogger");
        assert_eq!(msg.message, "hi");
        assert_eq!(msg.level, LogLevel::Info);
    }

    #[test]
    fn exceptions_property_goes_to_exception() {
        let xml = r#"<log4j:event logger="A" level="WARN">
            <nlog:properties><nlog:data name="Exceptions" value="trace here"/></nlog:properties>
        </log4j:event>"#;
        let msg = parse_event(xml, "X").unwrap();
        assert_eq!(msg.exception.as_deref(), Some("trace here"));
        assert!(msg.properties.is_empty());
    }

    #[test]
    fn self_closing_root_is_accepted() {
        let msg = parse_event(r#"<log4j:event logger="A.B" level="debug" thread="1"/>"#, "X").unwrap();
        assert_eq!(msg.logger_name, "A.B");
        assert_eq!(msg.level, LogLevel::Debug);
        assert_eq!(msg.message, "");
    }

    #[test]
    fn bad_numbers_are_ignored() {
        let xml = r#"<log4j:event logger="A" timestamp="soon">
            <log4j:locationInfo line="forty"/>
            <nlog:eventSequenceNumber>-3</nlog:eventSequenceNumber>
        </log4j:event>"#;
        let msg = parse_event(xml, "X").unwrap();
        assert_eq!(msg.source_file_line_nr, 0);
        assert_eq!(msg.sequence_nr, 0);
        assert_eq!(msg.level, LogLevel::None);
    }

    #[test]
    fn unknown_elements_are_skipped() {
        let xml = r#"<log4j:event logger="A"><nlog:locationInfo assembly="x"/><custom>ignored</custom><log4j:message>kept</log4j:message></log4j:event>"#;
        let msg = parse_event(xml, "X").unwrap();
        assert_eq!(msg.message, "kept");
    }

    #[test]
    fn wrong_root_is_rejected() {
        let err = parse_event("<event logger=\"A\"/>", "X").unwrap_err();
        assert!(err.to_string().contains("not a valid log4j Xml block"));
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(parse_event(r#"<log4j:event logger="A"><log4j:message>half"#, "X").is_err());
    }

    #[test]
    fn malformed_input_degrades() {
        let raw = "<log4j:event logger=\"A\"><log4j:message>oops</wrong></log4j:event>";
        let msg = parse_or_degrade(raw, "TcpLogger");
        assert_eq!(msg.message, raw);
        assert_eq!(msg.logger_name, "TcpLogger");
        assert_eq!(msg.root_logger_name, "TcpLogger");
        assert_eq!(msg.thread_name, "NA");
        assert_eq!(msg.level, LogLevel::Info);
        assert!(msg.has_exception());
    }

    #[test]
    fn leading_garbage_degrades() {
        let raw = "garbage<log4j:event logger=\"A\"/>";
        let msg = parse_or_degrade(raw, "FileLogger");
        assert_eq!(msg.message, raw);
        assert!(msg.has_exception());
    }
}
