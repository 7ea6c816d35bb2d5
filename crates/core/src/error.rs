//! Error types shared across the Log2Console crates.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Log2ConsoleError {
    /// Configuration problem
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Receiver lifecycle failure
    #[error("receiver error: {0}")]
    Receiver(#[from] LifecycleError),

    /// Wire format problem
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
///
/// Raised when a value is assigned, so an invalid setting never reaches a
/// running receiver.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file missing
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Config file could not be parsed
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A single field holds an unacceptable value
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Receiver lifecycle errors surfaced to the host.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// `initialize` failed; the receiver has been terminated
    #[error("receiver '{receiver}' failed to initialize: {reason}")]
    InitFailed { receiver: String, reason: String },

    /// Delivery channel closed
    #[error("channel closed: {0}")]
    Channel(String),
}

/// Wire format errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Input did not follow the expected format
    #[error("malformed {format} input: {reason}")]
    Malformed { format: String, reason: String },

    /// Input exceeded the configured limit
    #[error("input too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}
