//! Socket policy server.
//!
//! Sandboxed socket clients ask port 943 for an access policy before they are
//! allowed to open a TCP connection. This receiver answers that request with
//! a policy granting the configured port range. It never produces log
//! messages of its own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use log2console_core::sink::LogMessageSink;

use super::tcp::bind_listener;
use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, any_addr};
use crate::error::ReceiverError;

/// The only request the server answers.
pub const POLICY_REQUEST: &str = "<policy-file-request/>";

/// How long a client gets to send its request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    pub ipv6: bool,
    /// First port clients may connect to
    pub port_from: u16,
    /// Last port clients may connect to
    pub port_to: u16,
    pub name: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            port: 943,
            ipv6: false,
            port_from: 4502,
            port_to: 4532,
            name: None,
        }
    }
}

impl ReceiverConfig for PolicyConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        if self.port_from == 0 || self.port_to == 0 {
            return Err(ReceiverError::config(
                "policy_server.port_from",
                "granted ports must be greater than 0",
            ));
        }
        if self.port_from > self.port_to {
            return Err(ReceiverError::config(
                "policy_server.port_to",
                format!(
                    "range {}-{} is empty",
                    self.port_from, self.port_to
                ),
            ));
        }
        Ok(())
    }
}

/// Renders the policy document for a port range.
pub fn policy_document(port_from: u16, port_to: u16) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" ?>\n\
         <access-policy>\n\
         <cross-domain-access>\n\
         <policy>\n  \
         <allow-from><domain uri=\"*\" /></allow-from>\n  \
         <grant-to>\n    \
         <socket-resource port=\"{port_from}-{port_to}\" protocol=\"tcp\" />\n  \
         </grant-to>\n\
         </policy>\n\
         </cross-domain-access>\n\
         </access-policy>\n"
    )
}

pub struct PolicyServerReceiver {
    config: PolicyConfig,
    // never delivers; holds the sink only for attach/detach
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
    local_addr: Option<SocketAddr>,
}

impl PolicyServerReceiver {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            slot: SinkSlot::new(ReceiverKind::PolicyServer),
            state: ReceiverState::Idle,
            worker: None,
            local_addr: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn policy(&self) -> String {
        policy_document(self.config.port_from, self.config.port_to)
    }
}

impl Receiver for PolicyServerReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::PolicyServer
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "This receiver allows sandboxed socket clients to connect.\n\
             It grants access to TCP ports {}-{}.",
            self.config.port_from, self.config.port_to
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
        let addr = any_addr(self.config.ipv6, self.config.port);
        let listener = match bind_listener(addr, None) {
            Ok(listener) => listener,
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        };
        let local = listener.local_addr()?;
        info!(
            receiver = "policy_server",
            addr = %local,
            ports = %format!("{}-{}", self.config.port_from, self.config.port_to),
            "listening"
        );

        let worker = Worker::new();
        worker.spawn(accept_loop(
            listener,
            Arc::from(self.policy()),
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
            info!(receiver = "policy_server", "terminated");
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

async fn accept_loop(
    listener: TcpListener,
    policy: Arc<str>,
    cancel: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let policy = Arc::clone(&policy);
                    let cancel = cancel.clone();
                    tasks.spawn(async move {
                        tokio::select! {
                            result = serve_policy(stream, &policy) => {
                                if let Err(e) = result {
                                    warn!(receiver = "policy_server", %peer, error = %e, "policy request failed");
                                }
                            }
                            () = cancel.cancelled() => {}
                        }
                    });
                }
                Err(e) => warn!(receiver = "policy_server", error = %e, "accept failed"),
            },
            () = cancel.cancelled() => break,
        }
    }
}

async fn serve_policy(mut stream: TcpStream, policy: &str) -> Result<(), ReceiverError> {
    let mut request = vec![0u8; POLICY_REQUEST.len()];
    tokio::time::timeout(REQUEST_TIMEOUT, stream.read_exact(&mut request))
        .await
        .map_err(|_| ReceiverError::transport("policy_server", "timed out waiting for request"))??;

    if request != POLICY_REQUEST.as_bytes() {
        return Err(ReceiverError::transport(
            "policy_server",
            format!(
                "unexpected request '{}'",
                String::from_utf8_lossy(&request)
            ),
        ));
    }

    stream.write_all(policy.as_bytes()).await?;
    stream.shutdown().await?;
    debug!(receiver = "policy_server", "policy sent");
    Ok(())
}
