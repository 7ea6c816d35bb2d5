//! Log2Console receivers.
//!
//! # Modules
//!
//! - [`parser`]: log4j/NLog XML and Serilog JSON event parsers, plus a stream codec
//! - [`receiver`]: the receiver contract and every transport receiver
//! - [`registry`]: type name to constructor table
//! - [`funnel`]: bounded multi-producer queue drained by one consumer task
//! - [`config`]: receiver settings decoding and validation
//! - [`error`]: receiver error type
//!
//! # Architecture
//!
//! ```text
//! TCP/UDP/HTTP/WS/Queue/File/EventLog/Remoting --notify--> Funnel --drain--> consumer
//!          |                                                  |
//!   log4j XML / Serilog JSON                       capacity + drop policy
//! ```

pub mod config;
pub mod error;
pub mod funnel;
pub mod parser;
pub mod receiver;
pub mod registry;

pub use config::ReceiverConfig;
pub use error::ReceiverError;
pub use funnel::{Funnel, MessageConsumer};
pub use parser::{Log4jEventCodec, WireFormat};
pub use receiver::{DynReceiver, Receiver, ReceiverKind, ReceiverState, SinkSlot};
pub use registry::ReceiverRegistry;
