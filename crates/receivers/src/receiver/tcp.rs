//! TCP log4j XML receiver.
//!
//! Accepts any number of client connections (bounded by `max_connections`).
//! Each connection runs in its own task and frames the byte stream with
//! [`Log4jEventCodec`], so an event is delivered as soon as its closing tag
//! arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use log2console_core::message::LogMessage;
use log2console_core::metrics as m;
use log2console_core::sink::LogMessageSink;

use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, any_addr};
use crate::error::ReceiverError;
use crate::parser::codec::DEFAULT_MAX_FRAME;
use crate::parser::{Log4jEventCodec, log4j};

/// Logger used when an event does not name one.
pub const DEFAULT_LOGGER: &str = "TcpLogger";

const LISTEN_BACKLOG: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    pub ipv6: bool,
    /// Socket receive buffer size in bytes
    pub buffer_size: u32,
    pub max_connections: usize,
    /// Largest accepted event in bytes
    pub max_event_size: usize,
    /// Optional qualifier shown in the display name
    pub name: Option<String>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            port: 4505,
            ipv6: false,
            buffer_size: 10_000,
            max_connections: 256,
            max_event_size: DEFAULT_MAX_FRAME,
            name: None,
        }
    }
}

impl ReceiverConfig for TcpConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        if self.max_connections == 0 {
            return Err(ReceiverError::config(
                "tcp.max_connections",
                "must be greater than 0",
            ));
        }
        if self.max_event_size == 0 {
            return Err(ReceiverError::config(
                "tcp.max_event_size",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Binds a listening TCP socket with the given receive buffer size.
pub(crate) fn bind_listener(
    addr: SocketAddr,
    recv_buffer: Option<u32>,
) -> Result<TcpListener, ReceiverError> {
    let bind_err = |source| ReceiverError::Bind {
        addr: addr.to_string(),
        source,
    };
    let socket = if addr.is_ipv6() {
        TcpSocket::new_v6()
    } else {
        TcpSocket::new_v4()
    }
    .map_err(bind_err)?;
    if let Some(size) = recv_buffer.filter(|s| *s > 0) {
        socket.set_recv_buffer_size(size).map_err(bind_err)?;
    }
    socket.bind(addr).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)
}

/// Rewrites names the way every TCP event is shown: the sender's logger
/// becomes the root and the full name is prefixed with the local port.
pub(crate) fn qualify_with_port(msg: &mut LogMessage, port: u16) {
    let logger = msg.logger_name.clone();
    let qualified = format!(":{port}.{logger}");
    msg.rebase(logger, qualified);
}

pub struct TcpReceiver {
    config: TcpConfig,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
    local_addr: Option<SocketAddr>,
}

impl TcpReceiver {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            slot: SinkSlot::new(ReceiverKind::Tcp),
            state: ReceiverState::Idle,
            worker: None,
            local_addr: None,
        }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Receiver for TcpReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::Tcp
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "Configuration for NLog:\n\
             <target name=\"TcpOutlet\" xsi:type=\"NLogViewer\" address=\"tcp://localhost:{}\"/>",
            self.config.port
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
        let listener = match bind_listener(addr, Some(self.config.buffer_size)) {
            Ok(listener) => listener,
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        };
        let local = listener.local_addr()?;
        info!(receiver = "tcp", addr = %local, "listening");

        let worker = Worker::new();
        let ctx = ConnectionContext {
            slot: self.slot.clone(),
            port: local.port(),
            max_event_size: self.config.max_event_size,
            cancel: worker.token(),
        };
        worker.spawn(accept_loop(
            listener,
            ctx,
            Arc::new(Semaphore::new(self.config.max_connections)),
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
            info!(receiver = "tcp", "terminated");
        }
        self.local_addr = None;
        self.state = ReceiverState::Terminated;
    }

    fn attach(&mut self, sink: Arc<dyn LogMessageSink>) {
        self.slot.set(sink);
    }

    fn detach(&mut self) {
        self.slot.clear();
    }
}

#[derive(Clone)]
struct ConnectionContext {
    slot: SinkSlot,
    port: u16,
    max_event_size: usize,
    cancel: CancellationToken,
}

async fn accept_loop(
    listener: TcpListener,
    ctx: ConnectionContext,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(receiver = "tcp", error = %e, "accept failed");
                        continue;
                    }
                };
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    warn!(receiver = "tcp", %peer, "max connections reached, rejecting");
                    continue;
                };
                debug!(receiver = "tcp", %peer, "connection accepted");
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    handle_connection(stream, peer, ctx).await;
                    drop(permit);
                });
            }
            () = ctx.cancel.cancelled() => break,
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    let gauge = metrics::gauge!(m::RECEIVER_ACTIVE_CONNECTIONS, m::LABEL_RECEIVER => "tcp");
    gauge.increment(1.0);

    let mut frames = FramedRead::new(stream, Log4jEventCodec::with_max_frame(ctx.max_event_size));
    loop {
        tokio::select! {
            next = frames.next() => match next {
                Some(Ok(fragment)) => {
                    let mut msg = log4j::parse_or_degrade(&fragment, DEFAULT_LOGGER);
                    qualify_with_port(&mut msg, ctx.port);
                    ctx.slot.deliver(msg);
                }
                Some(Err(e)) => {
                    warn!(receiver = "tcp", %peer, error = %e, "connection closed on error");
                    break;
                }
                None => {
                    debug!(receiver = "tcp", %peer, "connection closed by peer");
                    break;
                }
            },
            () = ctx.cancel.cancelled() => break,
        }
    }

    gauge.decrement(1.0);
}
