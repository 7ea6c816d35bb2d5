//! Receiver error type.
//!
//! [`ReceiverError`] covers everything that can go wrong inside a receiver,
//! a parser or the registry. `From<ReceiverError> for Log2ConsoleError` lets
//! the host propagate it with `?`.

use log2console_core::error::{ConfigError, LifecycleError, Log2ConsoleError, ParseError};

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    /// Wire event could not be parsed
    #[error("parse error: {format}: {reason}")]
    Parse {
        /// Wire format (log4j_xml, serilog_json)
        format: String,
        reason: String,
    },

    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure (connect, handshake, queue access)
    #[error("{kind} receiver: {reason}")]
    Transport { kind: String, reason: String },

    /// Invalid receiver setting
    #[error("config error: {field}: {reason}")]
    Config { field: String, reason: String },

    /// Unknown receiver type or unavailable backend
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Internal delivery channel closed
    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReceiverError {
    pub(crate) fn parse(format: &str, reason: impl std::fmt::Display) -> Self {
        Self::Parse {
            format: format.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(kind: &str, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            kind: kind.to_owned(),
            reason: reason.to_string(),
        }
    }
}

impl From<ReceiverError> for Log2ConsoleError {
    fn from(err: ReceiverError) -> Self {
        match err {
            ReceiverError::Parse { format, reason } => {
                Log2ConsoleError::Parse(ParseError::Malformed { format, reason })
            }
            ReceiverError::Config { field, reason } => {
                Log2ConsoleError::Config(ConfigError::InvalidValue { field, reason })
            }
            ReceiverError::Io(e) => Log2ConsoleError::Io(e),
            ReceiverError::Channel(reason) => {
                Log2ConsoleError::Receiver(LifecycleError::Channel(reason))
            }
            other => Log2ConsoleError::Receiver(LifecycleError::InitFailed {
                receiver: "receiver".to_owned(),
                reason: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = ReceiverError::parse("log4j_xml", "unexpected end of input");
        let msg = err.to_string();
        assert!(msg.contains("log4j_xml"));
        assert!(msg.contains("unexpected end of input"));
    }

    #[test]
    fn bind_error_keeps_address() {
        let err = ReceiverError::Bind {
            addr: "0.0.0.0:4505".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:4505"));
    }

    #[test]
    fn config_error_maps_to_config() {
        let err: Log2ConsoleError = ReceiverError::config("port", "must not be 0").into();
        assert!(matches!(
            err,
            Log2ConsoleError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn transport_error_maps_to_lifecycle() {
        let err: Log2ConsoleError = ReceiverError::transport("websocket", "refused").into();
        assert!(matches!(err, Log2ConsoleError::Receiver(_)));
        assert!(err.to_string().contains("refused"));
    }
}
