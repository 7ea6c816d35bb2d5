//! Event log receiver.
//!
//! Subscribes to the entries of one (machine, log, source) triple through an
//! [`EventLogSource`] backend and maps them onto log messages. Two backends
//! ship with the crate:
//!
//! - [`InMemoryEventLog`]: a hub the host or tests write entries into
//! - [`UnavailableEventLog`]: used where no system event log exists; every
//!   subscription fails, so `initialize` reports a clean error

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use log2console_core::level::LogLevel;
use log2console_core::message::LogMessage;
use log2console_core::sink::LogMessageSink;

use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, validate_not_empty};
use crate::error::ReceiverError;

/// Machine name meaning "this computer".
pub const LOCAL_MACHINE: &str = ".";

/// Severity of an event log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Error,
    Warning,
    Information,
    SuccessAudit,
    FailureAudit,
    Other,
}

impl EntryType {
    pub fn level(self) -> LogLevel {
        match self {
            Self::Warning => LogLevel::Warn,
            Self::Error | Self::FailureAudit => LogLevel::Error,
            Self::Information | Self::SuccessAudit => LogLevel::Info,
            Self::Other => LogLevel::None,
        }
    }
}

/// One written entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    pub source: String,
    pub message: String,
    pub time_generated: DateTime<Local>,
    pub entry_type: EntryType,
    pub instance_id: u64,
    pub category: String,
    pub user_name: String,
}

impl EventLogEntry {
    pub fn new(source: impl Into<String>, entry_type: EntryType, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
            time_generated: Local::now(),
            entry_type,
            instance_id: 0,
            category: String::new(),
            user_name: String::new(),
        }
    }
}

/// Delivers the entries of one log as they are written.
pub trait EventLogSource: Send + Sync {
    /// Opens a subscription. Entries arrive until the receiver is dropped
    /// or the source goes away. An empty `source` matches every source.
    fn subscribe(
        &self,
        machine: &str,
        log: &str,
        source: &str,
    ) -> Result<mpsc::UnboundedReceiver<EventLogEntry>, ReceiverError>;
}

struct Subscription {
    log: String,
    source: String,
    tx: mpsc::UnboundedSender<EventLogEntry>,
}

/// Process-local event log.
#[derive(Default, Clone)]
pub struct InMemoryEventLog {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes an entry to `log`; returns how many subscribers received it.
    pub fn write(&self, log: &str, entry: EventLogEntry) -> usize {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|s| !s.tx.is_closed());
        subs.iter()
            .filter(|s| s.log.eq_ignore_ascii_case(log))
            .filter(|s| s.source.is_empty() || s.source.eq_ignore_ascii_case(&entry.source))
            .filter(|s| s.tx.send(entry.clone()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|s| !s.tx.is_closed());
        subs.len()
    }
}

impl EventLogSource for InMemoryEventLog {
    fn subscribe(
        &self,
        _machine: &str,
        log: &str,
        source: &str,
    ) -> Result<mpsc::UnboundedReceiver<EventLogEntry>, ReceiverError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                log: log.to_owned(),
                source: source.to_owned(),
                tx,
            });
        Ok(rx)
    }
}

/// Backend for platforms without a system event log.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableEventLog;

impl EventLogSource for UnavailableEventLog {
    fn subscribe(
        &self,
        machine: &str,
        log: &str,
        _source: &str,
    ) -> Result<mpsc::UnboundedReceiver<EventLogEntry>, ReceiverError> {
        Err(ReceiverError::Unsupported(format!(
            "event log '{log}' on '{machine}': no system event log on this platform"
        )))
    }
}

/// The platform's system event log.
pub fn system_event_log() -> Arc<dyn EventLogSource> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(super::journal::JournalEventLog::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnavailableEventLog)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    pub log_name: String,
    /// Computer holding the log, `.` for this one
    pub machine_name: String,
    /// Entry source filter, empty for all
    pub source: String,
    /// Prefix the logger with the machine name for remote logs
    pub append_host_name: bool,
    pub name: Option<String>,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            log_name: "Application".to_owned(),
            machine_name: LOCAL_MACHINE.to_owned(),
            source: String::new(),
            append_host_name: true,
            name: None,
        }
    }
}

impl ReceiverConfig for EventLogConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        validate_not_empty("event_log.log_name", &self.log_name)
    }
}

impl EventLogConfig {
    fn machine(&self) -> &str {
        if self.machine_name.is_empty() {
            LOCAL_MACHINE
        } else {
            &self.machine_name
        }
    }

    /// Root logger for every entry of this log.
    pub fn base_logger(&self) -> String {
        let machine = self.machine();
        if self.append_host_name && machine != LOCAL_MACHINE {
            format!("[Host: {machine}].{}", self.log_name)
        } else {
            self.log_name.clone()
        }
    }
}

fn entry_message(entry: EventLogEntry, base: &str) -> LogMessage {
    let logger = if entry.source.is_empty() {
        base.to_owned()
    } else {
        format!("{base}.{}", entry.source)
    };
    let mut msg = LogMessage {
        timestamp: entry.time_generated,
        level: entry.entry_type.level(),
        message: entry.message,
        thread_name: entry.instance_id.to_string(),
        ..LogMessage::default()
    };
    msg.rebase(base, logger);
    if !entry.category.is_empty() {
        msg.properties.insert("Category".to_owned(), entry.category);
    }
    if !entry.user_name.is_empty() {
        msg.properties.insert("User Name".to_owned(), entry.user_name);
    }
    msg
}

pub struct EventLogReceiver {
    config: EventLogConfig,
    source: Arc<dyn EventLogSource>,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
}

impl EventLogReceiver {
    /// Receiver backed by [`system_event_log`].
    pub fn new(config: EventLogConfig) -> Self {
        Self::with_source(config, system_event_log())
    }

    pub fn with_source(config: EventLogConfig, source: Arc<dyn EventLogSource>) -> Self {
        Self {
            config,
            source,
            slot: SinkSlot::new(ReceiverKind::EventLog),
            state: ReceiverState::Idle,
            worker: None,
        }
    }
}

impl Receiver for EventLogReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::EventLog
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        "Displays the entries of an event log.\n\
         Note that the Thread column is used to display the Instance ID (Event ID)."
            .to_owned()
    }

    fn state(&self) -> ReceiverState {
        self.state.clone()
    }

    async fn initialize(&mut self) -> Result<(), ReceiverError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let entries = match self.source.subscribe(
            self.config.machine(),
            &self.config.log_name,
            &self.config.source,
        ) {
            Ok(rx) => rx,
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        };

        let base = self.config.base_logger();
        info!(receiver = "event_log", log = %self.config.log_name, machine = self.config.machine(), "subscribed");
        let worker = Worker::new();
        worker.spawn(entry_loop(entries, base, self.slot.clone(), worker.token()));
        self.worker = Some(worker);
        self.state = ReceiverState::Listening;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "event_log", log = %self.config.log_name, "terminated");
        }
        self.state = ReceiverState::Terminated;
    }

    fn attach(&mut self, sink: Arc<dyn LogMessageSink>) {
        self.slot.set(sink);
    }

    fn detach(&mut self) {
        self.slot.clear();
    }
}

async fn entry_loop(
    mut entries: mpsc::UnboundedReceiver<EventLogEntry>,
    base: String,
    slot: SinkSlot,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            entry = entries.recv() => match entry {
                Some(entry) => {
                    slot.deliver(entry_message(entry, &base));
                }
                None => break,
            },
            () = cancel.cancelled() => break,
        }
    }
}
