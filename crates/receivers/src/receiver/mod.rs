//! Receiver contract and the transport receivers.
//!
//! A receiver owns at most one listening resource and one notification
//! target ([`SinkSlot`]). Its lifecycle:
//!
//! ```text
//! new(config) -> initialize() -> Listening -> terminate() -> Terminated
//!                    ^                                          |
//!                    +------------------------------------------+
//! ```
//!
//! `initialize` on a running receiver is a no-op. `terminate` is safe to call
//! at any point, including after a failed `initialize` and repeatedly.
//!
//! [`Receiver`] uses RPITIT and is not dyn-compatible. [`DynReceiver`] is the
//! boxed-future mirror the registry and the host work with; every `Receiver`
//! gets it through a blanket impl.

pub mod event_log;
pub mod file;
pub mod http;
pub mod journal;
pub mod msmq;
pub mod policy;
pub mod remoting;
pub mod tcp;
pub mod udp;
pub mod websocket;

pub use event_log::{
    EventLogReceiver, EventLogSource, InMemoryEventLog, UnavailableEventLog, system_event_log,
};
pub use journal::JournalEventLog;
pub use file::FileReceiver;
pub use http::HttpReceiver;
pub use msmq::{MessageQueue, MsmqReceiver, SpoolQueue};
pub use policy::PolicyServerReceiver;
pub use remoting::{RemotingReceiver, RemotingSink};
pub use tcp::TcpReceiver;
pub use udp::UdpReceiver;
pub use websocket::WebSocketReceiver;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use log2console_core::message::LogMessage;
use log2console_core::metrics as m;
use log2console_core::sink::LogMessageSink;

use crate::error::ReceiverError;

/// Boxed future returned by [`DynReceiver`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// --- ReceiverKind ---

/// Transport variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverKind {
    Tcp,
    Udp,
    Http,
    WebSocket,
    Msmq,
    File,
    EventLog,
    Remoting,
    PolicyServer,
}

impl ReceiverKind {
    pub const ALL: [ReceiverKind; 9] = [
        Self::Tcp,
        Self::Udp,
        Self::Http,
        Self::WebSocket,
        Self::Msmq,
        Self::File,
        Self::EventLog,
        Self::Remoting,
        Self::PolicyServer,
    ];

    /// Registry key and metric label.
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Http => "http",
            Self::WebSocket => "websocket",
            Self::Msmq => "msmq",
            Self::File => "file",
            Self::EventLog => "event_log",
            Self::Remoting => "remoting",
            Self::PolicyServer => "policy_server",
        }
    }

    /// Human-readable label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Tcp => "TCP (IP v4 and v6)",
            Self::Udp => "UDP (IP v4 and v6)",
            Self::Http => "HTTP Json (IP v4 and v6)",
            Self::WebSocket => "WebSockets",
            Self::Msmq => "Message Queue (MSMQ)",
            Self::File => "Log File (Flat or Log4j XML Formatted)",
            Self::EventLog => "Event Log",
            Self::Remoting => "Remoting Sink",
            Self::PolicyServer => "Socket Policy Server",
        }
    }

    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_name() == name)
    }
}

impl fmt::Display for ReceiverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// `"{label}"`, or `"{label} [{qualifier}]"` when the user named the instance.
pub fn display_name(kind: ReceiverKind, qualifier: Option<&str>) -> String {
    match qualifier.filter(|q| !q.is_empty()) {
        Some(q) => format!("{} [{q}]", kind.label()),
        None => kind.label().to_owned(),
    }
}

// --- ReceiverState ---

/// Lifecycle state of one receiver instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// Constructed, nothing acquired
    #[default]
    Idle,
    /// Resource acquired, worker running
    Listening,
    /// Released by `terminate`
    Terminated,
    /// `initialize` failed
    Failed(String),
}

impl ReceiverState {
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

// --- Receiver trait ---

/// A log source.
///
/// # Example
/// ```ignore
/// let mut rx = TcpReceiver::new(TcpConfig::default());
/// rx.attach(funnel.clone());
/// rx.initialize().await?;
/// // ...
/// rx.terminate().await;
/// ```
pub trait Receiver: Send + Sync {
    fn kind(&self) -> ReceiverKind;

    fn display_name(&self) -> String;

    /// Client-side configuration snippet that points a logging library at
    /// this receiver.
    fn sample_client_config(&self) -> String;

    fn state(&self) -> ReceiverState;

    /// Acquires the resource and starts the worker.
    fn initialize(&mut self) -> impl Future<Output = Result<(), ReceiverError>> + Send;

    /// Stops the worker and releases everything.
    fn terminate(&mut self) -> impl Future<Output = ()> + Send;

    /// Sets the notification target. Replaces any previous one.
    fn attach(&mut self, sink: Arc<dyn LogMessageSink>);

    fn detach(&mut self);
}

/// dyn-compatible mirror of [`Receiver`].
pub trait DynReceiver: Send + Sync {
    fn kind(&self) -> ReceiverKind;
    fn display_name(&self) -> String;
    fn sample_client_config(&self) -> String;
    fn state(&self) -> ReceiverState;
    fn initialize(&mut self) -> BoxFuture<'_, Result<(), ReceiverError>>;
    fn terminate(&mut self) -> BoxFuture<'_, ()>;
    fn attach(&mut self, sink: Arc<dyn LogMessageSink>);
    fn detach(&mut self);
}

impl<T: Receiver> DynReceiver for T {
    fn kind(&self) -> ReceiverKind {
        Receiver::kind(self)
    }

    fn display_name(&self) -> String {
        Receiver::display_name(self)
    }

    fn sample_client_config(&self) -> String {
        Receiver::sample_client_config(self)
    }

    fn state(&self) -> ReceiverState {
        Receiver::state(self)
    }

    fn initialize(&mut self) -> BoxFuture<'_, Result<(), ReceiverError>> {
        Box::pin(Receiver::initialize(self))
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(Receiver::terminate(self))
    }

    fn attach(&mut self, sink: Arc<dyn LogMessageSink>) {
        Receiver::attach(self, sink)
    }

    fn detach(&mut self) {
        Receiver::detach(self)
    }
}

// --- SinkSlot ---

/// Shared, swappable notification target.
///
/// Worker tasks keep a clone and read the current sink on every delivery,
/// so `attach` / `detach` take effect without restarting the worker.
/// Deliveries with no sink attached are dropped and counted.
#[derive(Clone)]
pub struct SinkSlot {
    kind: ReceiverKind,
    sink: Arc<RwLock<Option<Arc<dyn LogMessageSink>>>>,
}

impl SinkSlot {
    pub fn new(kind: ReceiverKind) -> Self {
        Self {
            kind,
            sink: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set(&self, sink: Arc<dyn LogMessageSink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn clear(&self) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn current(&self) -> Option<Arc<dyn LogMessageSink>> {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_attached(&self) -> bool {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Delivers one message; returns `false` when it was dropped.
    pub fn deliver(&self, message: LogMessage) -> bool {
        match self.current() {
            Some(sink) => {
                metrics::counter!(m::RECEIVER_MESSAGES_TOTAL, m::LABEL_RECEIVER => self.kind.type_name())
                    .increment(1);
                sink.notify(message);
                true
            }
            None => {
                self.record_dropped(1);
                false
            }
        }
    }

    /// Delivers an ordered batch with a single sink call.
    pub fn deliver_batch(&self, messages: Vec<LogMessage>) -> bool {
        if messages.is_empty() {
            return true;
        }
        match self.current() {
            Some(sink) => {
                metrics::counter!(m::RECEIVER_MESSAGES_TOTAL, m::LABEL_RECEIVER => self.kind.type_name())
                    .increment(messages.len() as u64);
                sink.notify_batch(messages);
                true
            }
            None => {
                self.record_dropped(messages.len() as u64);
                false
            }
        }
    }

    fn record_dropped(&self, count: u64) {
        metrics::counter!(
            m::RECEIVER_DROPPED_TOTAL,
            m::LABEL_RECEIVER => self.kind.type_name(),
            m::LABEL_REASON => m::REASON_NO_SINK
        )
        .increment(count);
        tracing::trace!(receiver = %self.kind, count, "no sink attached, message dropped");
    }
}

impl fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkSlot")
            .field("kind", &self.kind)
            .field("attached", &self.is_attached())
            .finish()
    }
}

// --- Worker ---

/// Cancellation token plus the tasks it governs.
///
/// A receiver creates one per `initialize` and drops it in `terminate`
/// after [`Worker::shutdown`] has joined every task.
#[derive(Debug)]
pub struct Worker {
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Worker {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tracker(&self) -> TaskTracker {
        self.tasks.clone()
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels every task and waits for all of them to return.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}
