//! File tail receiver.
//!
//! Watches one file and turns appended content into messages, either one
//! message per line (`flat`) or log4j XML fragments (`log4j_xml`). Change
//! notifications come from the OS through `notify`, watching the parent
//! directory; a slow fallback poll covers filesystems that do not report
//! changes.
//!
//! # Offsets
//! - The read offset starts at 0 with `show_from_beginning`, else at the
//!   current end of file.
//! - A file shorter than the offset was truncated; reading restarts at 0.
//! - Nothing is read while no sink is attached. Attaching triggers a read,
//!   so content that arrived in the meantime is not lost.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Notify, mpsc};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use log2console_core::level::LogLevel;
use log2console_core::message::{LogMessage, NO_THREAD};
use log2console_core::sink::LogMessageSink;

use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::ReceiverConfig;
use crate::error::ReceiverError;
use crate::parser::{Log4jEventCodec, log4j};

/// Line or event layout of the watched file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// One line per message
    #[default]
    Flat,
    /// Concatenated log4j XML events
    #[serde(alias = "xml", alias = "log4j")]
    Log4jXml,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// File to watch; empty leaves the receiver idle
    pub file_to_watch: PathBuf,
    pub format: FileFormat,
    pub show_from_beginning: bool,
    /// Logger qualifier, also shown in the display name
    pub name: Option<String>,
    /// Fallback re-check period; 0 relies on change notifications only
    pub poll_interval_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            file_to_watch: PathBuf::new(),
            format: FileFormat::Flat,
            show_from_beginning: false,
            name: None,
            poll_interval_ms: 1_000,
        }
    }
}

impl ReceiverConfig for FileConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        if !self.file_to_watch.as_os_str().is_empty() && self.file_to_watch.file_name().is_none() {
            return Err(ReceiverError::config(
                "file.file_to_watch",
                format!("'{}' does not name a file", self.file_to_watch.display()),
            ));
        }
        Ok(())
    }
}

impl FileConfig {
    fn file_name(&self) -> String {
        self.file_to_watch
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn qualifier(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// `(root, full logger)` for flat lines.
    fn logger_names(&self) -> (String, String) {
        match self.qualifier() {
            Some(name) => (name.to_owned(), format!("FileLogger.{name}")),
            None => {
                let file = self.file_name();
                let full = format!("FileLogger.{}", file.replace('.', "_"));
                (file, full)
            }
        }
    }
}

/// Read position and partial-content buffer of one watched file.
struct Tail {
    path: PathBuf,
    format: FileFormat,
    root: String,
    logger: String,
    offset: u64,
    pending: BytesMut,
    codec: Log4jEventCodec,
}

impl Tail {
    fn new(config: &FileConfig, offset: u64) -> Self {
        let (root, logger) = config.logger_names();
        Self {
            path: config.file_to_watch.clone(),
            format: config.format,
            root,
            logger,
            offset,
            pending: BytesMut::new(),
            codec: Log4jEventCodec::new(),
        }
    }

    /// Reads everything appended since the last call.
    async fn read_appended(&mut self) -> Result<Vec<LogMessage>, ReceiverError> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if len < self.offset {
            debug!(receiver = "file", path = %self.path.display(), "file truncated, reading from start");
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut chunk = Vec::with_capacity((len - self.offset) as usize);
        let read = file.read_to_end(&mut chunk).await?;
        self.offset += read as u64;
        self.pending.extend_from_slice(&chunk);

        Ok(match self.format {
            FileFormat::Flat => self.take_lines(),
            FileFormat::Log4jXml => self.take_events(),
        })
    }

    fn take_lines(&mut self) -> Vec<LogMessage> {
        let mut out = Vec::new();
        while let Some(nl) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending.split_to(nl);
            self.pending.advance(1);
            let line = line.strip_suffix(b"\r").unwrap_or(&line);
            out.push(self.flat_message(&String::from_utf8_lossy(line)));
        }
        out
    }

    fn take_events(&mut self) -> Vec<LogMessage> {
        let mut out = Vec::new();
        loop {
            match self.codec.decode(&mut self.pending) {
                Ok(Some(fragment)) => out.push(log4j::parse_or_degrade(&fragment, &self.logger)),
                Ok(None) => break,
                Err(e) => {
                    warn!(receiver = "file", path = %self.path.display(), error = %e, "discarding oversized event");
                }
            }
        }
        out
    }

    fn flat_message(&self, line: &str) -> LogMessage {
        let mut msg = LogMessage::new(self.logger.as_str(), LogLevel::Info, line);
        msg.root_logger_name = self.root.clone();
        msg.thread_name = NO_THREAD.to_owned();
        msg
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Remove(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

fn watch_parent(path: &Path, tx: mpsc::Sender<()>) -> Result<RecommendedWatcher, ReceiverError> {
    let file_name = path.file_name().map(|n| n.to_os_string());
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let Ok(event) = res else { return };
        let ours = event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
        if ours && is_change(&event.kind) {
            // a full channel already has a pending read queued
            let _ = tx.try_send(());
        }
    })
    .map_err(|e| ReceiverError::transport("file", e))?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    watcher
        .watch(parent, RecursiveMode::NonRecursive)
        .map_err(|e| ReceiverError::transport("file", e))?;
    Ok(watcher)
}

pub struct FileReceiver {
    config: FileConfig,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
    wake: Arc<Notify>,
}

impl FileReceiver {
    pub fn new(config: FileConfig) -> Self {
        Self {
            config,
            slot: SinkSlot::new(ReceiverKind::File),
            state: ReceiverState::Idle,
            worker: None,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn file_to_watch(&self) -> &Path {
        &self.config.file_to_watch
    }

    /// Points the receiver at another file, restarting it when running.
    pub async fn set_file_to_watch(&mut self, path: impl Into<PathBuf>) -> Result<(), ReceiverError> {
        let path = path.into();
        if path == self.config.file_to_watch {
            return Ok(());
        }
        let candidate = FileConfig {
            file_to_watch: path,
            ..self.config.clone()
        };
        candidate.validate()?;
        self.config = candidate;
        if self.worker.is_some() {
            self.terminate().await;
            self.initialize().await?;
        }
        Ok(())
    }

    async fn start(&mut self) -> Result<(), ReceiverError> {
        let path = self.config.file_to_watch.clone();
        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            ReceiverError::transport("file", format!("{}: {e}", path.display()))
        })?;
        let offset = if self.config.show_from_beginning {
            0
        } else {
            file.metadata().await?.len()
        };
        drop(file);

        let (tx, rx) = mpsc::channel(1);
        let watcher = watch_parent(&path, tx)?;
        info!(receiver = "file", path = %path.display(), offset, "watching");

        let worker = Worker::new();
        let poll = (self.config.poll_interval_ms > 0)
            .then(|| Duration::from_millis(self.config.poll_interval_ms));
        worker.spawn(tail_loop(
            Tail::new(&self.config, offset),
            self.slot.clone(),
            TailSignals {
                changes: rx,
                wake: Arc::clone(&self.wake),
                poll,
                cancel: worker.token(),
            },
            watcher,
        ));
        self.worker = Some(worker);
        Ok(())
    }
}

impl Receiver for FileReceiver {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::File
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.qualifier())
    }

    fn sample_client_config(&self) -> String {
        "Configuration for log4net:\n\
         <appender name=\"FileAppender\" type=\"log4net.Appender.FileAppender\">\n\
         \x20   <file value=\"log-file.txt\" />\n\
         \x20   <appendToFile value=\"true\" />\n\
         \x20   <lockingModel type=\"log4net.Appender.FileAppender+MinimalLock\" />\n\
         \x20   <layout type=\"log4net.Layout.XmlLayoutSchemaLog4j\" />\n\
         </appender>"
            .to_owned()
    }

    fn state(&self) -> ReceiverState {
        self.state.clone()
    }

    async fn initialize(&mut self) -> Result<(), ReceiverError> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.config.file_to_watch.as_os_str().is_empty() {
            debug!(receiver = "file", "no file configured, staying idle");
            return Ok(());
        }
        match self.start().await {
            Ok(()) => {
                self.state = ReceiverState::Listening;
                Ok(())
            }
            Err(e) => {
                self.state = ReceiverState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "file", path = %self.config.file_to_watch.display(), "terminated");
        }
        self.state = ReceiverState::Terminated;
    }

    fn attach(&mut self, sink: Arc<dyn LogMessageSink>) {
        self.slot.set(sink);
        self.wake.notify_one();
    }

    fn detach(&mut self) {
        self.slot.clear();
    }
}

struct TailSignals {
    changes: mpsc::Receiver<()>,
    wake: Arc<Notify>,
    poll: Option<Duration>,
    cancel: CancellationToken,
}

async fn tail_loop(
    mut tail: Tail,
    slot: SinkSlot,
    mut signals: TailSignals,
    watcher: RecommendedWatcher,
) {
    // keeps the OS watch registered for the lifetime of the loop
    let _watcher = watcher;
    let poll = signals.poll.unwrap_or(Duration::MAX);

    loop {
        if slot.is_attached() {
            match tail.read_appended().await {
                Ok(batch) => {
                    slot.deliver_batch(batch);
                }
                Err(e) => {
                    warn!(receiver = "file", path = %tail.path.display(), error = %e, "read failed");
                }
            }
        }

        tokio::select! {
            change = signals.changes.recv() => {
                if change.is_none() {
                    break;
                }
            }
            () = signals.wake.notified() => {}
            () = tokio::time::sleep(poll), if signals.poll.is_some() => {}
            () = signals.cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(path: &str, name: Option<&str>) -> FileConfig {
        FileConfig {
            file_to_watch: PathBuf::from(path),
            name: name.map(str::to_owned),
            ..FileConfig::default()
        }
    }

    #[test]
    fn logger_names_from_file_name() {
        let (root, full) = config("/var/log/app.log", None).logger_names();
        assert_eq!(root, "app.log");
        assert_eq!(full, "FileLogger.app_log");
    }

    #[test]
    fn logger_names_from_qualifier() {
        let c = config("/var/log/app.log", Some("Orders"));
        let (root, full) = c.logger_names();
        assert_eq!(root, "Orders");
        assert_eq!(full, "FileLogger.Orders");
    }

    #[test]
    fn display_name_only_with_qualifier() {
        let rx = FileReceiver::new(config("/tmp/x.log", Some("x")));
        assert_eq!(rx.display_name(), "Log File (Flat or Log4j XML Formatted) [x]");
        let rx = FileReceiver::new(config("/tmp/x.log", None));
        assert_eq!(rx.display_name(), ReceiverKind::File.label());
    }

    #[tokio::test]
    async fn reads_lines_and_resets_on_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        tokio::fs::write(&path, "one\r\ntwo\npart").await.unwrap();

        let mut tail = Tail::new(&config(path.to_str().unwrap(), None), 0);
        let batch = tail.read_appended().await.unwrap();
        let texts: Vec<_> = batch.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(batch[0].logger_name, "FileLogger.app_log");
        assert_eq!(batch[0].thread_name, NO_THREAD);

        tokio::fs::write(&path, "x\n").await.unwrap();
        let batch = tail.read_appended().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message, "x");
    }

    #[tokio::test]
    async fn reads_xml_fragments_across_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.xml");
        tokio::fs::write(&path, "<log4j:event logger=\"A\" level=\"WARN\"><log4j:message>m")
            .await
            .unwrap();

        let mut c = config(path.to_str().unwrap(), None);
        c.format = FileFormat::Log4jXml;
        let mut tail = Tail::new(&c, 0);
        assert!(tail.read_appended().await.unwrap().is_empty());

        let mut f = tokio::fs::OpenOptions::new().append(true).open(&path).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut f, b"sg</log4j:message></log4j:event>\n")
            .await
            .unwrap();
        let batch = tail.read_appended().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message, "msg");
        assert_eq!(batch[0].level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn missing_file_fails_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut rx = FileReceiver::new(config(dir.path().join("nope.log").to_str().unwrap(), None));
        assert!(rx.initialize().await.is_err());
        assert!(matches!(rx.state(), ReceiverState::Failed(_)));
        rx.terminate().await;
    }

    #[tokio::test]
    async fn empty_path_stays_idle() {
        let mut rx = FileReceiver::new(FileConfig::default());
        rx.initialize().await.unwrap();
        assert_eq!(rx.state(), ReceiverState::Idle);
    }
}
