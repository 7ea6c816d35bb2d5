//! End-to-end receiver tests over real loopback sockets, files and spool
//! directories. Every receiver delivers into a shared [`Funnel`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_tungstenite::tungstenite::Message;

use log2console_core::config::DropPolicy;
use log2console_core::level::LogLevel;
use log2console_core::message::LogMessage;
use log2console_receivers::Funnel;
use log2console_receivers::Receiver;
use log2console_receivers::parser::WireFormat;
use log2console_receivers::receiver::file::{FileConfig, FileFormat, FileReceiver};
use log2console_receivers::receiver::http::{BodyFormat, HttpConfig, HttpReceiver};
use log2console_receivers::receiver::msmq::{MsmqConfig, MsmqReceiver};
use log2console_receivers::receiver::remoting::{RemotingConfig, RemotingReceiver};
use log2console_receivers::receiver::tcp::{TcpConfig, TcpReceiver};
use log2console_receivers::receiver::udp::{UdpConfig, UdpReceiver};
use log2console_receivers::receiver::websocket::{WebSocketConfig, WebSocketReceiver};
use log2console_receivers::ReceiverState;

const WAIT: Duration = Duration::from_secs(5);

fn funnel() -> Arc<Funnel> {
    Arc::new(Funnel::new(10_000, DropPolicy::Oldest))
}

/// Drains `funnel` until `count` messages arrived or the deadline passed.
async fn collect(funnel: &Funnel, count: usize) -> Vec<LogMessage> {
    let deadline = tokio::time::Instant::now() + WAIT;
    let mut out = Vec::new();
    while out.len() < count && tokio::time::Instant::now() < deadline {
        out.extend(funnel.drain());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    out
}

fn loopback(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

fn event(logger: &str, level: &str, thread: &str, message: &str) -> String {
    format!(
        r#"<log4j:event logger="{logger}" level="{level}" timestamp="1700000000000" thread="{thread}"><log4j:message>{message}</log4j:message></log4j:event>"#
    )
}

#[tokio::test]
async fn tcp_stream_yields_one_message_per_event() {
    let sink = funnel();
    let mut rx = TcpReceiver::new(TcpConfig {
        port: 0,
        ..TcpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());

    let mut client = TcpStream::connect(addr).await.unwrap();
    let payload = format!(
        "{}\r\n{}",
        event("App.Core", "WARN", "1", "first"),
        event("App.Core", "ERROR", "1", "second")
    );
    // split mid-event to exercise stream framing
    let (a, b) = payload.split_at(payload.len() / 2 + 7);
    client.write_all(a.as_bytes()).await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    client.write_all(b.as_bytes()).await.unwrap();

    let messages = collect(&sink, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message, "first");
    assert_eq!(messages[0].level, LogLevel::Warn);
    assert_eq!(messages[1].level, LogLevel::Error);
    assert_eq!(messages[0].root_logger_name, "App.Core");
    assert_eq!(messages[0].logger_name, format!(":{}.App.Core", addr.port()));

    rx.terminate().await;
    assert_eq!(rx.state(), ReceiverState::Terminated);
}

#[tokio::test]
async fn tcp_connections_keep_their_own_order() {
    let sink = funnel();
    let mut rx = TcpReceiver::new(TcpConfig {
        port: 0,
        ..TcpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());

    const CLIENTS: usize = 4;
    const PER_CLIENT: usize = 50;
    let mut handles = Vec::new();
    for client in 0..CLIENTS {
        handles.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            for i in 0..PER_CLIENT {
                let e = event("Load", "INFO", &client.to_string(), &i.to_string());
                stream.write_all(e.as_bytes()).await.unwrap();
            }
            stream.shutdown().await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let messages = collect(&sink, CLIENTS * PER_CLIENT).await;
    assert_eq!(messages.len(), CLIENTS * PER_CLIENT);
    let mut next: HashMap<String, usize> = HashMap::new();
    for msg in &messages {
        let expected = next.entry(msg.thread_name.clone()).or_default();
        assert_eq!(msg.message, expected.to_string(), "client {}", msg.thread_name);
        *expected += 1;
    }

    rx.terminate().await;
}

#[tokio::test]
async fn udp_datagrams_are_grouped_by_sender() {
    let sink = funnel();
    let mut rx = UdpReceiver::new(UdpConfig {
        port: 0,
        condense_logger: true,
        ..UdpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let datagram = event("MyCompany.SubSystem.ClassName", "DEBUG", "7", "hello");
    client.send_to(datagram.as_bytes(), addr).await.unwrap();

    let messages = collect(&sink, 1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].root_logger_name, "127-0-0-1");
    assert_eq!(messages[0].logger_name, "127-0-0-1_MC.SS.ClassName");
    assert_eq!(messages[0].level, LogLevel::Debug);

    rx.terminate().await;
}

#[tokio::test]
async fn udp_serilog_datagrams() {
    let sink = funnel();
    let mut rx = UdpReceiver::new(UdpConfig {
        port: 0,
        format: WireFormat::SerilogJson,
        ..UdpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(
            br#"{"level":"Warning","message":"disk low","sourceContext":"Ops.Disk"}"#,
            addr,
        )
        .await
        .unwrap();

    let messages = collect(&sink, 1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, LogLevel::Warn);
    assert_eq!(messages[0].logger_name, "127-0-0-1_Ops.Disk");

    rx.terminate().await;
}

async fn http_request(addr: SocketAddr, method: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{method} /log HTTP/1.1\r\nHost: localhost\r\nContent-Type: text/plain\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn http_body_becomes_a_message() {
    let sink = funnel();
    let mut rx = HttpReceiver::new(HttpConfig {
        port: 0,
        ..HttpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = rx.local_addr().unwrap();

    let response = http_request(addr, "POST", "plain text from the browser").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let lower = response.to_ascii_lowercase();
    assert!(lower.contains("access-control-allow-origin: *"));
    assert!(lower.contains("access-control-max-age: 1728000"));

    let messages = collect(&sink, 1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message, "plain text from the browser");
    assert_eq!(messages[0].level, LogLevel::Info);
    assert_eq!(messages[0].root_logger_name, "HttpJsonReceiver");
    assert_eq!(
        messages[0].logger_name,
        format!(":{}.HttpJsonReceiver", addr.port())
    );

    rx.terminate().await;
}

#[tokio::test]
async fn http_json_body_is_parsed() {
    let sink = funnel();
    let mut rx = HttpReceiver::new(HttpConfig {
        port: 0,
        format: BodyFormat::Json,
        ..HttpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = rx.local_addr().unwrap();

    let body = r#"{"level":"Error","message":"boom","sourceContext":"Web.Checkout"}"#;
    http_request(addr, "POST", body).await;

    let messages = collect(&sink, 1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].level, LogLevel::Error);
    assert_eq!(messages[0].message, "boom");
    assert_eq!(messages[0].root_logger_name, "Web.Checkout");

    rx.terminate().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn http_serves_every_host_on_one_port() {
    let sink = funnel();
    let mut rx = HttpReceiver::new(HttpConfig {
        port: 0,
        hosts: vec!["127.0.0.1".parse().unwrap(), "127.0.0.2".parse().unwrap()],
        ..HttpConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addrs = rx.local_addrs().to_vec();
    assert_eq!(addrs.len(), 2);
    assert_eq!(addrs[0].port(), addrs[1].port());

    for (i, addr) in addrs.iter().enumerate() {
        let response = http_request(*addr, "POST", &format!("via {i}")).await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    }

    let messages = collect(&sink, 2).await;
    let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, ["via 0", "via 1"]);

    rx.terminate().await;
    assert!(rx.local_addrs().is_empty());
}

#[tokio::test]
async fn remoting_envelope_is_one_batch() {
    let sink = funnel();
    let mut rx = RemotingReceiver::new(RemotingConfig {
        port: 0,
        ..RemotingConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());

    let mut client = TcpStream::connect(addr).await.unwrap();
    let envelope = serde_json::json!({
        "sink": "LoggingSink",
        "events": [
            { "logger_name": "Svc.A", "level": 40000, "message": "one",
              "properties": { "log4net:HostName": "build-agent" } },
            { "logger_name": "Svc.B", "level": 70000, "message": "two" }
        ]
    });
    let wrong = serde_json::json!({ "sink": "Elsewhere", "events": [{ "message": "lost" }] });
    let lines = format!("{wrong}\n{envelope}\n");
    client.write_all(lines.as_bytes()).await.unwrap();

    let messages = collect(&sink, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].root_logger_name, "build-agent");
    assert_eq!(messages[0].logger_name, "[Host: build-agent].Svc.A");
    assert_eq!(messages[0].level, LogLevel::Info);
    assert_eq!(messages[1].logger_name, "Svc.B");
    assert_eq!(messages[1].level, LogLevel::Error);

    rx.terminate().await;
}

#[tokio::test]
async fn remoting_malformed_line_arrives_degraded() {
    let sink = funnel();
    let mut rx = RemotingReceiver::new(RemotingConfig {
        port: 0,
        ..RemotingConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());

    let mut client = TcpStream::connect(addr).await.unwrap();
    let good = serde_json::json!({ "sink": "LoggingSink", "events": [{ "message": "after" }] });
    client
        .write_all(format!("{{not json}}\n{good}\n").as_bytes())
        .await
        .unwrap();

    let messages = collect(&sink, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message, "{not json}");
    assert_eq!(messages[0].logger_name, "LoggingSink");
    assert!(messages[0].has_exception());
    assert_eq!(messages[1].message, "after");
    assert_eq!(messages[1].logger_name, "Unknown");
    assert_eq!(messages[1].thread_name, "NA");

    rx.terminate().await;
}

#[tokio::test]
async fn websocket_client_reports_states_and_events() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let handshake = match ws.next().await {
            Some(Ok(Message::Text(text))) => text.to_string(),
            other => panic!("expected handshake text, got {other:?}"),
        };
        ws.send(Message::Text(event("Srv.Jobs", "ERROR", "9", "job failed").into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
        while ws.next().await.is_some() {}
        handshake
    });

    let sink = funnel();
    let mut rx = WebSocketReceiver::new(WebSocketConfig {
        server_uri: format!("ws://127.0.0.1:{port}"),
        handshake_message: "subscribe".to_owned(),
        ..WebSocketConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();

    let received = collect(&sink, 4).await;
    assert_eq!(server.await.unwrap(), "subscribe");

    let root = format!("ws-127-0-0-1-{port}");
    let texts: Vec<&str> = received.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(
        texts,
        [
            "WebSocket state changed: Connecting",
            "WebSocket state changed: Open",
            "job failed",
            "WebSocket state changed: Closed",
        ]
    );
    assert_eq!(received[2].level, LogLevel::Error);
    assert_eq!(received[2].logger_name, format!("{root}_Srv.Jobs"));
    assert_eq!(received[2].root_logger_name, root);
    assert_eq!(received[0].logger_name, format!("{root}_wssLogger"));

    // no reconnect unless configured
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(sink.drain().is_empty());
    rx.terminate().await;
}

#[tokio::test]
async fn file_tail_picks_up_appended_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "old line\n").unwrap();

    let sink = funnel();
    let mut rx = FileReceiver::new(FileConfig {
        file_to_watch: path.clone(),
        format: FileFormat::Flat,
        poll_interval_ms: 50,
        ..FileConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .await
        .unwrap();
    file.write_all(b"first\r\nsecond\npartial").await.unwrap();
    file.flush().await.unwrap();

    let messages = collect(&sink, 2).await;
    let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, ["first", "second"]);
    assert_eq!(messages[0].root_logger_name, "app.log");
    assert_eq!(messages[0].logger_name, "FileLogger.app_log");

    file.write_all(b" line\n").await.unwrap();
    file.flush().await.unwrap();
    let messages = collect(&sink, 1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message, "partial line");

    rx.terminate().await;
}

#[tokio::test]
async fn file_tail_from_beginning_reads_log4j_events() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.xml");
    let content = format!(
        "{}\n{}\n",
        event("Batch.Job", "INFO", "3", "started"),
        event("Batch.Job", "FATAL", "3", "crashed")
    );
    std::fs::write(&path, content).unwrap();

    let sink = funnel();
    let mut rx = FileReceiver::new(FileConfig {
        file_to_watch: path,
        format: FileFormat::Log4jXml,
        show_from_beginning: true,
        poll_interval_ms: 50,
        ..FileConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();

    let messages = collect(&sink, 2).await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].level, LogLevel::Fatal);
    assert_eq!(messages[1].message, "crashed");

    rx.terminate().await;
}

#[tokio::test]
async fn spool_queue_messages_are_delivered_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let sink = funnel();
    let mut rx = MsmqReceiver::new(MsmqConfig {
        spool_dir: dir.path().to_path_buf(),
        create: true,
        poll_interval_ms: 20,
        ..MsmqConfig::default()
    });
    rx.attach(sink.clone());
    rx.initialize().await.unwrap();

    for i in 0..3 {
        let body = event("Queue.Consumer", "INFO", "9", &format!("job {i}"));
        rx.queue().send(body.as_bytes()).await.unwrap();
    }

    let messages = collect(&sink, 3).await;
    let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(texts, ["job 0", "job 1", "job 2"]);
    assert_eq!(messages[0].root_logger_name, "log");
    assert_eq!(messages[0].logger_name, "log_Queue.Consumer");

    rx.terminate().await;
}

#[tokio::test]
async fn detached_receiver_drops_and_reattach_resumes() {
    let sink = funnel();
    let mut rx = UdpReceiver::new(UdpConfig {
        port: 0,
        ..UdpConfig::default()
    });
    rx.initialize().await.unwrap();
    let addr = loopback(rx.local_addr().unwrap());
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client
        .send_to(event("A", "INFO", "1", "unseen").as_bytes(), addr)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    rx.attach(sink.clone());
    client
        .send_to(event("A", "INFO", "1", "seen").as_bytes(), addr)
        .await
        .unwrap();

    let messages = collect(&sink, 1).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message, "seen");

    rx.terminate().await;
}
