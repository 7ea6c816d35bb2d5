//! Remoting sink receiver.
//!
//! A push-style endpoint for appenders that batch events on the client side.
//! Clients connect over TCP and write newline-delimited JSON envelopes:
//!
//! ```json
//! {"sink":"LoggingSink","events":[{"logger_name":"App","level":40000,"message":"hi"}]}
//! ```
//!
//! Envelopes addressed to another sink name are rejected. Each accepted
//! envelope is delivered as one batch. [`RemotingSink::log_events`] offers the
//! same conversion to in-process callers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use log2console_core::level::LogLevel;
use log2console_core::message::{LogMessage, NO_THREAD, UNKNOWN_LOGGER};
use log2console_core::metrics as m;
use log2console_core::sink::LogMessageSink;

use super::tcp::bind_listener;
use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, any_addr, validate_not_empty};
use crate::error::ReceiverError;

/// Property carrying the sender's host name.
pub const HOST_NAME_PROPERTY: &str = "log4net:HostName";

/// One event as sent by a remote appender.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEvent {
    pub logger_name: String,
    /// Numeric level, bucketed into the level bands
    pub level: Option<u32>,
    pub thread_name: String,
    pub message: String,
    pub timestamp: Option<DateTime<Local>>,
    pub exception: Option<String>,
    pub properties: HashMap<String, String>,
}

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sink: String,
    #[serde(default)]
    pub events: Vec<RemoteEvent>,
}

/// Converts remote events and hands them to the attached sink.
#[derive(Debug, Clone)]
pub struct RemotingSink {
    sink_name: String,
    append_host_name: bool,
    slot: SinkSlot,
}

impl RemotingSink {
    fn new(sink_name: String, append_host_name: bool, slot: SinkSlot) -> Self {
        Self {
            sink_name,
            append_host_name,
            slot,
        }
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn convert(&self, event: RemoteEvent) -> LogMessage {
        let logger_name = if event.logger_name.is_empty() {
            UNKNOWN_LOGGER.to_owned()
        } else {
            event.logger_name
        };
        let host = self
            .append_host_name
            .then(|| event.properties.get(HOST_NAME_PROPERTY).cloned())
            .flatten()
            .filter(|h| !h.is_empty());
        let (root, logger) = match host {
            Some(host) => {
                let logger = format!("[Host: {host}].{logger_name}");
                (host, logger)
            }
            None => (logger_name.clone(), logger_name),
        };
        let thread_name = if event.thread_name.is_empty() {
            NO_THREAD.to_owned()
        } else {
            event.thread_name
        };

        let mut msg = LogMessage {
            level: event.level.map_or(LogLevel::None, LogLevel::from_value),
            message: event.message,
            thread_name,
            exception: event.exception.filter(|e| !e.is_empty()),
            properties: event.properties,
            ..LogMessage::default()
        };
        if let Some(ts) = event.timestamp {
            msg.timestamp = ts;
        }
        msg.rebase(root, logger);
        msg
    }

    /// Converts and delivers a batch; returns how many messages were delivered.
    pub fn log_events(&self, events: Vec<RemoteEvent>) -> usize {
        if events.is_empty() || !self.slot.is_attached() {
            return 0;
        }
        let batch: Vec<LogMessage> = events.into_iter().map(|e| self.convert(e)).collect();
        let count = batch.len();
        if self.slot.deliver_batch(batch) { count } else { 0 }
    }

    /// Checks the addressed sink and delivers the envelope's events.
    pub fn accept(&self, envelope: Envelope) -> Result<usize, ReceiverError> {
        if envelope.sink != self.sink_name {
            return Err(ReceiverError::transport(
                "remoting",
                format!(
                    "envelope for sink '{}' rejected, this endpoint is '{}'",
                    envelope.sink, self.sink_name
                ),
            ));
        }
        Ok(self.log_events(envelope.events))
    }

    /// Delivers a line that is not a valid envelope as a degraded message.
    pub fn deliver_malformed(&self, line: &str, error: impl std::fmt::Display) -> bool {
        crate::parser::record_parse_error("remoting_json");
        self.slot
            .deliver(LogMessage::degraded(line, &self.sink_name, error))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemotingConfig {
    pub sink_name: String,
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    pub ipv6: bool,
    /// Group loggers under the sender's host name
    pub append_host_name: bool,
    /// Longest accepted envelope line in bytes
    pub max_line_length: usize,
    pub name: Option<String>,
}

impl Default for RemotingConfig {
    fn default() -> Self {
        Self {
            sink_name: "LoggingSink".to_owned(),
            port: 7070,
            ipv6: false,
            append_host_name: true,
            max_line_length: 8 * 1024 * 1024,
            name: None,
        }
    }
}

impl ReceiverConfig for RemotingConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        validate_not_empty("remoting.sink_name", &self.sink_name)?;
        if self.max_line_length == 0 {
            return Err(ReceiverError::config(
                "remoting.max_line_length",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

pub struct RemotingReceiver {
    config: RemotingConfig,
    sink: RemotingSink,
    state: ReceiverState,
    worker: Option<Worker>,
    local_addr: Option<SocketAddr>,
}

impl RemotingReceiver {
    pub fn new(config: RemotingConfig) -> Self {
        let sink = RemotingSink::new(
            config.sink_name.clone(),
            config.append_host_name,
            SinkSlot::new(ReceiverKind::Remoting),
        );
        Self {
            config,
            sink,
            state: ReceiverState::Idle,
            worker: None,
            local_addr: None,
        }
    }

    /// In-process entry point sharing this receiver's sink.
    pub fn sink(&self) -> RemotingSink {
        self.sink.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Receiver for RemotingReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::Remoting
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "Write one JSON envelope per line to tcp://localhost:{port}:\n\
             {{\"sink\":\"{sink}\",\"events\":[{{\"logger_name\":\"App\",\"level\":40000,\
             \"thread_name\":\"1\",\"message\":\"hello\",\
             \"properties\":{{\"{HOST_NAME_PROPERTY}\":\"my-host\"}}}}]}}",
            port = self.config.port,
            sink = self.config.sink_name,
        )
    }

    fn state(&self) -> ReceiverState {
        self.state.clone()
    }

    async fn initialize(&mut self) -> Result<(), ReceiverError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let addr = any_addr(self.config.ipv6, self.config.port);
        let listener = match bind_listener(addr, None) {
            Ok(listener) => listener,
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        };
        let local = listener.local_addr()?;
        info!(receiver = "remoting", addr = %local, sink = %self.config.sink_name, "listening");

        let worker = Worker::new();
        worker.spawn(accept_loop(
            listener,
            self.sink.clone(),
            self.config.max_line_length,
            worker.token(),
            worker.tracker(),
        ));
        self.local_addr = Some(local);
        self.worker = Some(worker);
        self.state = ReceiverState::Listening;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "remoting", "terminated");
        }
        self.local_addr = None;
        self.state = ReceiverState::Terminated;
    }

    fn attach(&mut self, sink: Arc<dyn LogMessageSink>) {
        self.sink.slot.set(sink);
    }

    fn detach(&mut self) {
        self.sink.slot.clear();
    }
}

async fn accept_loop(
    listener: TcpListener,
    sink: RemotingSink,
    max_line_length: usize,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(receiver = "remoting", %peer, "client connected");
                    tasks.spawn(handle_client(stream, peer, sink.clone(), max_line_length, cancel.clone()));
                }
                Err(e) => warn!(receiver = "remoting", error = %e, "accept failed"),
            },
            () = cancel.cancelled() => break,
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    sink: RemotingSink,
    max_line_length: usize,
    cancel: CancellationToken,
) {
    let gauge = metrics::gauge!(m::RECEIVER_ACTIVE_CONNECTIONS, m::LABEL_RECEIVER => "remoting");
    gauge.increment(1.0);

    let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(max_line_length));
    loop {
        tokio::select! {
            next = lines.next() => match next {
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => match serde_json::from_str::<Envelope>(&line) {
                    Ok(envelope) => {
                        if let Err(e) = sink.accept(envelope) {
                            warn!(receiver = "remoting", %peer, error = %e, "envelope rejected");
                        }
                    }
                    Err(e) => {
                        warn!(receiver = "remoting", %peer, error = %e, "malformed envelope");
                        sink.deliver_malformed(&line, e);
                    }
                },
                Some(Err(e)) => {
                    warn!(receiver = "remoting", %peer, error = %e, "connection closed on error");
                    break;
                }
                None => break,
            },
            () = cancel.cancelled() => break,
        }
    }

    gauge.decrement(1.0);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Vec<LogMessage>>>);

    impl LogMessageSink for Recorder {
        fn notify(&self, message: LogMessage) {
            self.0.lock().unwrap().push(vec![message]);
        }

        fn notify_batch(&self, messages: Vec<LogMessage>) {
            self.0.lock().unwrap().push(messages);
        }
    }

    fn event(logger: &str, level: u32, host: Option<&str>) -> RemoteEvent {
        let mut properties = HashMap::new();
        if let Some(host) = host {
            properties.insert(HOST_NAME_PROPERTY.to_owned(), host.to_owned());
        }
        properties.insert("log4net:UserName".to_owned(), "DOMAIN\\me".to_owned());
        RemoteEvent {
            logger_name: logger.to_owned(),
            level: Some(level),
            thread_name: "5".to_owned(),
            message: "hello".to_owned(),
            properties,
            ..RemoteEvent::default()
        }
    }

    #[test]
    fn host_name_becomes_root() {
        let rx = RemotingReceiver::new(RemotingConfig::default());
        let msg = rx.sink().convert(event("App.Core", 60_000, Some("web01")));
        assert_eq!(msg.root_logger_name, "web01");
        assert_eq!(msg.logger_name, "[Host: web01].App.Core");
        assert_eq!(msg.level, LogLevel::Warn);
        assert_eq!(msg.thread_name, "5");
        assert_eq!(msg.properties["log4net:UserName"], "DOMAIN\\me");
        assert_eq!(msg.properties[HOST_NAME_PROPERTY], "web01");
    }

    #[test]
    fn without_host_the_logger_is_kept() {
        let rx = RemotingReceiver::new(RemotingConfig {
            append_host_name: false,
            ..RemotingConfig::default()
        });
        let msg = rx.sink().convert(event("App.Core", 45_000, Some("web01")));
        assert_eq!(msg.root_logger_name, "App.Core");
        assert_eq!(msg.logger_name, "App.Core");
        assert_eq!(msg.level, LogLevel::Warn);
    }

    #[test]
    fn level_is_bucketed() {
        let rx = RemotingReceiver::new(RemotingConfig::default());
        let sink = rx.sink();
        assert_eq!(sink.convert(event("a", 30_001, None)).level, LogLevel::Info);
        assert_eq!(sink.convert(event("a", 200_000, None)).level, LogLevel::None);
        let no_level = RemoteEvent::default();
        assert_eq!(sink.convert(no_level).level, LogLevel::None);
    }

    #[test]
    fn log_events_delivers_one_batch() {
        let mut rx = RemotingReceiver::new(RemotingConfig::default());
        let recorder = Arc::new(Recorder::default());
        assert_eq!(rx.sink().log_events(vec![event("a", 1, None)]), 0);

        rx.attach(recorder.clone());
        let delivered = rx
            .sink()
            .log_events(vec![event("a", 1, None), event("b", 1, None)]);
        assert_eq!(delivered, 2);
        let batches = recorder.0.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn missing_names_fall_back_to_placeholders() {
        let rx = RemotingReceiver::new(RemotingConfig::default());
        let msg = rx.sink().convert(RemoteEvent::default());
        assert_eq!(msg.logger_name, UNKNOWN_LOGGER);
        assert_eq!(msg.root_logger_name, UNKNOWN_LOGGER);
        assert_eq!(msg.thread_name, NO_THREAD);

        let mut hosted = event("", 40_000, Some("web01"));
        hosted.thread_name.clear();
        let msg = rx.sink().convert(hosted);
        assert_eq!(msg.root_logger_name, "web01");
        assert_eq!(msg.logger_name, "[Host: web01].Unknown");
        assert_eq!(msg.thread_name, NO_THREAD);
    }

    #[test]
    fn malformed_line_is_delivered_degraded() {
        let mut rx = RemotingReceiver::new(RemotingConfig::default());
        let recorder = Arc::new(Recorder::default());
        rx.attach(recorder.clone());

        let err = serde_json::from_str::<Envelope>("{not json}").unwrap_err();
        assert!(rx.sink().deliver_malformed("{not json}", err));

        let batches = recorder.0.lock().unwrap();
        let msg = &batches[0][0];
        assert_eq!(msg.message, "{not json}");
        assert_eq!(msg.logger_name, "LoggingSink");
        assert_eq!(msg.level, LogLevel::Info);
        assert!(msg.has_exception());
    }

    #[test]
    fn wrong_sink_name_is_rejected() {
        let rx = RemotingReceiver::new(RemotingConfig::default());
        let envelope = Envelope {
            sink: "Other".to_owned(),
            events: vec![event("a", 1, None)],
        };
        assert!(rx.sink().accept(envelope).is_err());
    }

    #[test]
    fn envelope_decodes_with_defaults() {
        let envelope: Envelope = serde_json::from_str(
            r#"{"sink":"LoggingSink","events":[{"logger_name":"X","message":"m","timestamp":"2024-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();
        assert_eq!(envelope.events.len(), 1);
        assert!(envelope.events[0].timestamp.is_some());
        assert!(envelope.events[0].level.is_none());
    }
}
