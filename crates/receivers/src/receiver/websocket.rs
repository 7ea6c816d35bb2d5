//! WebSocket client receiver.
//!
//! Connects out to a log server and treats every text or binary message as
//! one log4j XML event. Connection state changes are surfaced as synthetic
//! Info messages so they show up next to the logs themselves.
//!
//! A dropped connection is not retried unless `reconnect` is set.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::http::Uri;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use log2console_core::level::LogLevel;
use log2console_core::message::{LogMessage, NO_THREAD};
use log2console_core::sink::LogMessageSink;

use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::ReceiverConfig;
use crate::error::ReceiverError;
use crate::parser::log4j;

pub const DEFAULT_LOGGER: &str = "wssLogger";

/// Idle period while no sink is attached.
const IDLE_POLL: Duration = Duration::from_millis(150);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` server address
    pub server_uri: String,
    /// Text sent once right after connecting, empty for none
    pub handshake_message: String,
    pub reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub name: Option<String>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            server_uri: "wss://localhost:443".to_owned(),
            handshake_message: String::new(),
            reconnect: false,
            reconnect_interval_ms: 5_000,
            name: None,
        }
    }
}

impl ReceiverConfig for WebSocketConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        let uri: Uri = self.server_uri.parse().map_err(|e| {
            ReceiverError::config(
                "websocket.server_uri",
                format!("'{}' is not a valid URI: {e}", self.server_uri),
            )
        })?;
        if !matches!(uri.scheme_str(), Some("ws" | "wss")) {
            return Err(ReceiverError::config(
                "websocket.server_uri",
                format!("'{}' must use the ws:// or wss:// scheme", self.server_uri),
            ));
        }
        if uri.host().is_none_or(str::is_empty) {
            return Err(ReceiverError::config(
                "websocket.server_uri",
                format!("'{}' has no host", self.server_uri),
            ));
        }
        if self.reconnect && self.reconnect_interval_ms == 0 {
            return Err(ReceiverError::config(
                "websocket.reconnect_interval_ms",
                "must be greater than 0 when reconnect is enabled",
            ));
        }
        Ok(())
    }
}

/// Connection states reported as messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Logger root derived from the server URI.
///
/// `wss://logs.example.com:443` becomes `wss-logs-example-com-443`.
pub fn uri_root(uri: &str) -> String {
    uri.replace("wss://", "wss-")
        .replace("ws://", "ws-")
        .replace([':', '.'], "-")
}

fn rename(msg: &mut LogMessage, root: &str) {
    let full = format!("{root}_{}", msg.logger_name);
    msg.rebase(root, full);
}

fn state_message(state: ConnectionState, root: &str) -> LogMessage {
    let mut msg = LogMessage::new(
        DEFAULT_LOGGER,
        LogLevel::Info,
        format!("WebSocket state changed: {state}"),
    );
    msg.thread_name = NO_THREAD.to_owned();
    rename(&mut msg, root);
    msg
}

fn event_message(text: &str, root: &str) -> LogMessage {
    let mut msg = log4j::parse_or_degrade(text, DEFAULT_LOGGER);
    rename(&mut msg, root);
    msg
}

pub struct WebSocketReceiver {
    config: WebSocketConfig,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
}

impl WebSocketReceiver {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            slot: SinkSlot::new(ReceiverKind::WebSocket),
            state: ReceiverState::Idle,
            worker: None,
        }
    }
}

impl Receiver for WebSocketReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::WebSocket
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "Connects to {} and expects one log4j XML event per WebSocket message.\n\
             Configuration for log4net on the server side:\n\
             <layout type=\"log4net.Layout.XmlLayoutSchemaLog4j\" />",
            self.config.server_uri
        )
    }

    fn state(&self) -> ReceiverState {
        self.state.clone()
    }

    async fn initialize(&mut self) -> Result<(), ReceiverError> {
        if self.worker.is_some() {
            return Ok(());
        }
        if let Err(e) = self.config.validate() {
            self.state = ReceiverState::Failed(e.to_string());
            return Err(e);
        }

        info!(receiver = "websocket", uri = %self.config.server_uri, "starting client");
        let worker = Worker::new();
        worker.spawn(run_client(
            self.config.clone(),
            self.slot.clone(),
            worker.token(),
        ));
        self.worker = Some(worker);
        self.state = ReceiverState::Listening;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "websocket", "terminated");
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

async fn run_client(config: WebSocketConfig, slot: SinkSlot, cancel: CancellationToken) {
    let root = uri_root(&config.server_uri);
    let retry = config
        .reconnect
        .then(|| Duration::from_millis(config.reconnect_interval_ms));

    loop {
        slot.deliver(state_message(ConnectionState::Connecting, &root));
        let connected = tokio::select! {
            result = tokio_tungstenite::connect_async(config.server_uri.as_str()) => result,
            () = cancel.cancelled() => return,
        };

        match connected {
            Ok((mut ws, _response)) => {
                slot.deliver(state_message(ConnectionState::Open, &root));
                if !config.handshake_message.is_empty() {
                    if let Err(e) = ws
                        .send(Message::Text(config.handshake_message.clone()))
                        .await
                    {
                        warn!(receiver = "websocket", error = %e, "handshake send failed");
                    }
                }
                read_events(&mut ws, &root, &slot, &cancel).await;
                if let Err(e) = ws.close(None).await {
                    debug!(receiver = "websocket", error = %e, "close after read loop");
                }
            }
            Err(e) => {
                warn!(receiver = "websocket", uri = %config.server_uri, error = %e, "connect failed");
            }
        }
        slot.deliver(state_message(ConnectionState::Closed, &root));

        let Some(interval) = retry else { break };
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = cancel.cancelled() => break,
        }
    }
}

async fn read_events(ws: &mut WsStream, root: &str, slot: &SinkSlot, cancel: &CancellationToken) {
    loop {
        if !slot.is_attached() {
            tokio::select! {
                () = tokio::time::sleep(IDLE_POLL) => continue,
                () = cancel.cancelled() => return,
            }
        }
        tokio::select! {
            next = ws.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    slot.deliver(event_message(&text, root));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    slot.deliver(event_message(&String::from_utf8_lossy(&bytes), root));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(receiver = "websocket", ?frame, "server closed the connection");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(receiver = "websocket", error = %e, "connection lost");
                    return;
                }
                None => return,
            },
            () = cancel.cancelled() => return,
        }
    }
}
