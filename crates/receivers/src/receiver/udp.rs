//! UDP receiver.
//!
//! One datagram carries one complete event, either log4j XML or Serilog
//! JSON. There is no reassembly across datagrams. The socket can join a v4
//! or v6 multicast group.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use log2console_core::message::LogMessage;
use log2console_core::sink::LogMessageSink;

use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, any_addr, parse_multicast};
use crate::error::ReceiverError;
use crate::parser::WireFormat;

pub const DEFAULT_LOGGER: &str = "UdpLogger";

const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    pub ipv6: bool,
    /// Multicast group to join, empty for none
    pub multicast_group: String,
    pub buffer_size: usize,
    pub format: WireFormat,
    /// Shorten every logger segment but the last to its capitals
    pub condense_logger: bool,
    pub name: Option<String>,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            port: 7071,
            ipv6: false,
            multicast_group: String::new(),
            buffer_size: 10_000,
            format: WireFormat::Log4jXml,
            condense_logger: false,
            name: None,
        }
    }
}

impl UdpConfig {
    fn multicast(&self) -> Result<Option<IpAddr>, ReceiverError> {
        parse_multicast("udp.multicast_group", &self.multicast_group)
    }
}

impl ReceiverConfig for UdpConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        if let Some(group) = self.multicast()? {
            if group.is_ipv6() != self.ipv6 {
                return Err(ReceiverError::config(
                    "udp.multicast_group",
                    format!(
                        "'{group}' does not match the socket family (ipv6 = {})",
                        self.ipv6
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Keeps only the capitals of every segment except the last.
///
/// `MyCompany.SubSystem.ClassName` becomes `MC.SS.ClassName`.
pub fn condense_logger(name: &str) -> String {
    let Some((head, last)) = name.rsplit_once('.') else {
        return name.to_owned();
    };
    let mut out = head
        .split('.')
        .map(|segment| segment.chars().filter(|c| c.is_uppercase()).collect::<String>())
        .collect::<Vec<_>>()
        .join(".");
    out.push('.');
    out.push_str(last);
    out
}

/// Sender address as a logger-tree root: `.` and `:` become `-`.
pub fn address_root(ip: IpAddr) -> String {
    ip.to_canonical().to_string().replace(['.', ':'], "-")
}

fn rewrite_names(msg: &mut LogMessage, peer: IpAddr, condense: bool) {
    let root = address_root(peer);
    let logger = if condense {
        condense_logger(&msg.logger_name)
    } else {
        msg.logger_name.clone()
    };
    let full = format!("{root}_{logger}");
    msg.rebase(root, full);
}

fn bind_socket(
    addr: SocketAddr,
    buffer_size: usize,
    group: Option<IpAddr>,
) -> Result<UdpSocket, ReceiverError> {
    let bind_err = |source| ReceiverError::Bind {
        addr: addr.to_string(),
        source,
    };
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    if group.is_some() {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    if buffer_size > 0 {
        socket.set_recv_buffer_size(buffer_size).map_err(bind_err)?;
    }
    socket.bind(&addr.into()).map_err(bind_err)?;
    match group {
        Some(IpAddr::V4(group)) => socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .map_err(bind_err)?,
        Some(IpAddr::V6(group)) => socket.join_multicast_v6(&group, 0).map_err(bind_err)?,
        None => {}
    }
    socket.set_nonblocking(true).map_err(bind_err)?;
    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

pub struct UdpReceiver {
    config: UdpConfig,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
    local_addr: Option<SocketAddr>,
}

impl UdpReceiver {
    pub fn new(config: UdpConfig) -> Self {
        Self {
            config,
            slot: SinkSlot::new(ReceiverKind::Udp),
            state: ReceiverState::Idle,
            worker: None,
            local_addr: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn open(&self) -> Result<UdpSocket, ReceiverError> {
        let group = self.config.multicast()?;
        bind_socket(
            any_addr(self.config.ipv6, self.config.port),
            self.config.buffer_size,
            group,
        )
    }
}

impl Receiver for UdpReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::Udp
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "Configuration for log4net:\n\
             <appender name=\"UdpAppender\" type=\"log4net.Appender.UdpAppender\">\n\
             \x20   <remoteAddress value=\"127.0.0.1\" />\n\
             \x20   <remotePort value=\"{}\" />\n\
             \x20   <layout type=\"log4net.Layout.XmlLayoutSchemaLog4j\" />\n\
             </appender>\n\n\
             And add appender to log4net <root>:\n\
             <appender-ref ref=\"UdpAppender\" />",
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

        let socket = match self.open() {
            Ok(socket) => socket,
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        };
        let local = socket.local_addr()?;
        info!(
            receiver = "udp",
            addr = %local,
            multicast = %self.config.multicast_group,
            format = self.config.format.name(),
            "listening"
        );

        let worker = Worker::new();
        worker.spawn(receive_loop(
            socket,
            self.slot.clone(),
            self.config.format,
            self.config.condense_logger,
            worker.token(),
        ));
        self.local_addr = Some(local);
        self.worker = Some(worker);
        self.state = ReceiverState::Listening;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "udp", "terminated");
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

async fn receive_loop(
    socket: UdpSocket,
    slot: SinkSlot,
    format: WireFormat,
    condense: bool,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(receiver = "udp", error = %e, "receive failed, stopping");
                        break;
                    }
                };
                if !slot.is_attached() {
                    continue;
                }
                let text = String::from_utf8_lossy(&buf[..len]);
                let mut msg = format.parse_or_degrade(&text, DEFAULT_LOGGER);
                rewrite_names(&mut msg, peer.ip(), condense);
                slot.deliver(msg);
            }
            () = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;
    use log2console_core::level::LogLevel;

    #[test]
    fn condenses_all_but_last_segment() {
        assert_eq!(condense_logger("MyCompany.SubSystem.ClassName"), "MC.SS.ClassName");
        assert_eq!(condense_logger("ClassName"), "ClassName");
        assert_eq!(condense_logger("lower.Case"), ".Case");
    }

    #[test]
    fn address_root_replaces_separators() {
        assert_eq!(address_root(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))), "10-0-0-1");
        assert_eq!(address_root(IpAddr::V6(Ipv6Addr::LOCALHOST)), "--1");
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 168, 1, 2).to_ipv6_mapped());
        assert_eq!(address_root(mapped), "192-168-1-2");
    }

    #[test]
    fn names_are_rewritten_with_the_sender() {
        let mut msg = LogMessage::new("MyCompany.SubSystem.ClassName", LogLevel::Info, "x");
        rewrite_names(&mut msg, IpAddr::V4(Ipv4Addr::LOCALHOST), true);
        assert_eq!(msg.root_logger_name, "127-0-0-1");
        assert_eq!(msg.logger_name, "127-0-0-1_MC.SS.ClassName");
    }

    #[test]
    fn multicast_family_must_match() {
        let config = UdpConfig {
            multicast_group: "ff02::1".to_owned(),
            ..UdpConfig::default()
        };
        assert!(config.validate().is_err());
        let config = UdpConfig {
            multicast_group: "239.0.0.1".to_owned(),
            ..UdpConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn format_decodes_from_short_name() {
        let config: UdpConfig = serde_json::from_value(serde_json::json!({"format": "json"})).unwrap();
        assert_eq!(config.format, WireFormat::SerilogJson);
        assert_eq!(config.port, 7071);
    }

    #[tokio::test]
    async fn lifecycle_is_repeatable() {
        let mut rx = UdpReceiver::new(UdpConfig {
            port: 0,
            ..UdpConfig::default()
        });
        rx.initialize().await.unwrap();
        assert!(rx.local_addr().is_some());
        rx.terminate().await;
        rx.initialize().await.unwrap();
        assert!(rx.state().is_listening());
        rx.terminate().await;
        assert_eq!(rx.state(), ReceiverState::Terminated);
    }
}
