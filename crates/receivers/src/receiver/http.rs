//! HTTP receiver.
//!
//! Every request, whatever its method or path, turns its body into one log
//! message and gets an empty `200 OK` with permissive CORS headers, so
//! browser clients can post logs cross-origin.
//!
//! The same routes are served on every configured host address. With port 0
//! the first listener picks the port and the others reuse it.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, info, warn};

use log2console_core::level::LogLevel;
use log2console_core::message::LogMessage;
use log2console_core::sink::LogMessageSink;

use tokio::net::TcpListener;

use super::tcp::{bind_listener, qualify_with_port};
use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, loopback_addr};
use crate::error::ReceiverError;
use crate::parser::serilog;

pub const DEFAULT_LOGGER: &str = "HttpJsonReceiver";

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_METHODS: &str = "GET, POST, HEAD, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, Accept, X-Requested-With";
pub const MAX_AGE: &str = "1728000";

/// How a request body is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    /// The body is the message text
    #[default]
    Text,
    /// The body is one Serilog JSON event
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    /// Addresses to listen on; empty means loopback
    pub hosts: Vec<IpAddr>,
    /// Family of the default loopback address
    pub ipv6: bool,
    pub format: BodyFormat,
    /// Largest accepted body in bytes
    pub max_body_size: usize,
    pub name: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 4506,
            hosts: Vec::new(),
            ipv6: false,
            format: BodyFormat::Text,
            max_body_size: 2 * 1024 * 1024,
            name: None,
        }
    }
}

impl ReceiverConfig for HttpConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        if self.max_body_size == 0 {
            return Err(ReceiverError::config(
                "http.max_body_size",
                "must be greater than 0",
            ));
        }
        for (i, host) in self.hosts.iter().enumerate() {
            if self.hosts[..i].contains(host) {
                return Err(ReceiverError::config(
                    "http.hosts",
                    format!("{host} is listed twice"),
                ));
            }
        }
        Ok(())
    }
}

impl HttpConfig {
    /// Host addresses to bind, in order.
    pub fn bind_hosts(&self) -> Vec<IpAddr> {
        if self.hosts.is_empty() {
            vec![loopback_addr(self.ipv6, 0).ip()]
        } else {
            self.hosts.clone()
        }
    }
}

#[derive(Clone)]
struct HttpState {
    slot: SinkSlot,
    port: u16,
    format: BodyFormat,
}

/// Turns one request body into a message.
fn body_to_message(body: &[u8], port: u16, format: BodyFormat) -> LogMessage {
    let text = String::from_utf8_lossy(body);
    let mut msg = match format {
        BodyFormat::Text => {
            let mut msg = LogMessage::new(DEFAULT_LOGGER, LogLevel::Info, text.into_owned());
            msg.thread_name = String::new();
            msg
        }
        BodyFormat::Json => serilog::parse_or_degrade(&text, DEFAULT_LOGGER),
    };
    qualify_with_port(&mut msg, port);
    msg
}

async fn ingest(State(state): State<HttpState>, body: Bytes) -> StatusCode {
    debug!(receiver = "http", bytes = body.len(), "request received");
    state
        .slot
        .deliver(body_to_message(&body, state.port, state.format));
    StatusCode::OK
}

fn router(state: HttpState, max_body_size: usize) -> Router {
    Router::new()
        .fallback(ingest)
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(ALLOW_ORIGIN),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static(MAX_AGE),
        ))
}

pub struct HttpReceiver {
    config: HttpConfig,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
    local_addrs: Vec<SocketAddr>,
}

impl HttpReceiver {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            slot: SinkSlot::new(ReceiverKind::Http),
            state: ReceiverState::Idle,
            worker: None,
            local_addrs: Vec::new(),
        }
    }

    /// First bound address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addrs.first().copied()
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }
}

/// Binds every host on one shared port; all or nothing.
fn bind_all(hosts: &[IpAddr], port: u16) -> Result<Vec<TcpListener>, ReceiverError> {
    let mut listeners: Vec<TcpListener> = Vec::with_capacity(hosts.len());
    let mut port = port;
    for host in hosts {
        let listener = bind_listener(SocketAddr::new(*host, port), None)?;
        port = listener.local_addr()?.port();
        listeners.push(listener);
    }
    Ok(listeners)
}

impl Receiver for HttpReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::Http
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "POST any payload to http://localhost:{port}/\n\
             e.g. fetch(\"http://localhost:{port}/\", {{ method: \"POST\", body: \"hello\" }})",
            port = self.config.port
        )
    }

    fn state(&self) -> ReceiverState {
        self.state.clone()
    }

    async fn initialize(&mut self) -> Result<(), ReceiverError> {
        if self.worker.is_some() {
            return Ok(());
        }

        let listeners = match bind_all(&self.config.bind_hosts(), self.config.port) {
            Ok(listeners) => listeners,
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        };
        let locals = listeners
            .iter()
            .map(TcpListener::local_addr)
            .collect::<Result<Vec<_>, _>>()?;
        let port = locals.first().map_or(self.config.port, SocketAddr::port);

        let app = router(
            HttpState {
                slot: self.slot.clone(),
                port,
                format: self.config.format,
            },
            self.config.max_body_size,
        );
        let worker = Worker::new();
        for (listener, local) in listeners.into_iter().zip(&locals) {
            info!(receiver = "http", addr = %local, "listening");
            let app = app.clone();
            let shutdown = worker.token().cancelled_owned();
            let local = *local;
            worker.spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    warn!(receiver = "http", addr = %local, error = %e, "server stopped");
                }
            });
        }

        self.local_addrs = locals;
        self.worker = Some(worker);
        self.state = ReceiverState::Listening;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "http", "terminated");
        }
        self.local_addrs.clear();
        self.state = ReceiverState::Terminated;
    }

    fn attach(&mut self, sink: Arc<dyn LogMessageSink>) {
        self.slot.set(sink);
    }

    fn detach(&mut self) {
        self.slot.clear();
    }
}
