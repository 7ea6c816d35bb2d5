//! Message-queue receiver.
//!
//! Each queued message body is one log4j XML event. The queue itself sits
//! behind the [`MessageQueue`] trait; [`SpoolQueue`] is the built-in backend
//! where a queue is a directory and a message is a file, consumed in file
//! name order.
//!
//! If the queue does not exist the receiver either creates it (`create`) or
//! checks for it every 5 seconds until it shows up. A queue error while
//! receiving sends the receiver back to that check instead of stopping it.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use log2console_core::message::LogMessage;
use log2console_core::sink::LogMessageSink;

use super::{Receiver, ReceiverKind, ReceiverState, SinkSlot, Worker, display_name};
use crate::config::{ReceiverConfig, validate_not_empty};
use crate::error::ReceiverError;
use crate::parser::log4j;

pub const DEFAULT_LOGGER: &str = "MSMQLogger";

/// Default period of the queue-existence check.
pub const QUEUE_CHECK_INTERVAL_MS: u64 = 5_000;

/// Most backlog messages taken in one bulk batch.
pub const MAX_BULK: usize = 1000;

// --- backend ---

/// A named FIFO queue of opaque message bodies.
pub trait MessageQueue: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn exists(&self) -> impl Future<Output = Result<bool, ReceiverError>> + Send;

    fn create(&self) -> impl Future<Output = Result<(), ReceiverError>> + Send;

    /// Removes and returns the oldest message, or `None` when the queue is
    /// empty.
    fn try_receive(&self) -> impl Future<Output = Result<Option<Vec<u8>>, ReceiverError>> + Send;

    /// Removes and returns up to `max` of the oldest messages.
    ///
    /// Messages already removed are returned even if a later one fails; the
    /// error is reported only when nothing was taken.
    fn receive_up_to(
        &self,
        max: usize,
    ) -> impl Future<Output = Result<Vec<Vec<u8>>, ReceiverError>> + Send {
        async move {
            let mut bodies = Vec::new();
            while bodies.len() < max {
                match self.try_receive().await {
                    Ok(Some(body)) => bodies.push(body),
                    Ok(None) => break,
                    Err(e) if bodies.is_empty() => return Err(e),
                    Err(e) => {
                        warn!(receiver = "msmq", queue = self.name(), error = %e, "receive interrupted");
                        break;
                    }
                }
            }
            Ok(bodies)
        }
    }

    fn len(&self) -> impl Future<Output = Result<usize, ReceiverError>> + Send;
}

/// Directory-backed queue.
///
/// Producers write `*.msg` files; names starting with `.` are treated as
/// in-progress writes and skipped.
#[derive(Debug, Clone)]
pub struct SpoolQueue {
    name: String,
    dir: PathBuf,
}

static SPOOL_SEQ: AtomicU64 = AtomicU64::new(0);

impl SpoolQueue {
    pub fn new(spool_dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            dir: spool_dir.as_ref().join(&name),
            name,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_err(&self, e: std::io::Error) -> ReceiverError {
        ReceiverError::transport("msmq", format!("{}: {e}", self.dir.display()))
    }

    /// Enqueues a message body.
    ///
    /// The body is written to a hidden file first and renamed into place, so
    /// a consumer never sees a partial message.
    pub async fn send(&self, body: &[u8]) -> Result<(), ReceiverError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = SPOOL_SEQ.fetch_add(1, Ordering::Relaxed);
        let file_name = format!("{nanos:024}-{seq:012}.msg");
        let tmp = self.dir.join(format!(".{file_name}.tmp"));
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, self.dir.join(file_name))
            .await
            .map_err(|e| self.io_err(e))
    }

    async fn pending(&self) -> Result<Vec<PathBuf>, ReceiverError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.io_err(e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.io_err(e))? {
            let visible = entry
                .file_name()
                .to_str()
                .is_some_and(|n| !n.starts_with('.'));
            if visible {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Reads and removes one message file; `None` if it is already gone.
    async fn take(&self, path: &Path) -> Result<Option<Vec<u8>>, ReceiverError> {
        let body = match tokio::fs::read(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(Some(body)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

impl MessageQueue for SpoolQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, ReceiverError> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_err(e)),
        }
    }

    async fn create(&self) -> Result<(), ReceiverError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.io_err(e))
    }

    async fn try_receive(&self) -> Result<Option<Vec<u8>>, ReceiverError> {
        Ok(self.receive_up_to(1).await?.pop())
    }

    /// Lists the directory once and takes files in name order.
    async fn receive_up_to(&self, max: usize) -> Result<Vec<Vec<u8>>, ReceiverError> {
        let mut bodies = Vec::new();
        for path in self.pending().await? {
            if bodies.len() >= max {
                break;
            }
            match self.take(&path).await {
                Ok(Some(body)) => bodies.push(body),
                // taken by another consumer
                Ok(None) => {}
                Err(e) if bodies.is_empty() => return Err(e),
                Err(e) => {
                    warn!(receiver = "msmq", queue = %self.name, error = %e, "receive interrupted");
                    break;
                }
            }
        }
        Ok(bodies)
    }

    async fn len(&self) -> Result<usize, ReceiverError> {
        Ok(self.pending().await?.len())
    }
}

// --- receiver ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MsmqConfig {
    pub queue_name: String,
    /// Root directory holding one subdirectory per spool queue
    pub spool_dir: PathBuf,
    /// Create the queue when it does not exist
    pub create: bool,
    /// Deliver queued backlog as one batch after each receive
    pub bulk: bool,
    /// How often an empty queue is checked again
    pub poll_interval_ms: u64,
    /// How often a missing queue is looked for
    pub queue_check_interval_ms: u64,
    pub name: Option<String>,
}

impl Default for MsmqConfig {
    fn default() -> Self {
        Self {
            queue_name: "log".to_owned(),
            spool_dir: std::env::temp_dir().join("log2console-spool"),
            create: false,
            bulk: true,
            poll_interval_ms: 250,
            queue_check_interval_ms: QUEUE_CHECK_INTERVAL_MS,
            name: None,
        }
    }
}

impl ReceiverConfig for MsmqConfig {
    fn validate(&self) -> Result<(), ReceiverError> {
        validate_not_empty("msmq.queue_name", &self.queue_name)?;
        let plain = Path::new(&self.queue_name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || self.queue_name.contains(['/', '\\']) {
            return Err(ReceiverError::config(
                "msmq.queue_name",
                format!("'{}' must be a single path segment", self.queue_name),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ReceiverError::config(
                "msmq.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.queue_check_interval_ms == 0 {
            return Err(ReceiverError::config(
                "msmq.queue_check_interval_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn queue_message(body: &[u8], queue: &str) -> LogMessage {
    let text = String::from_utf8_lossy(body);
    let mut msg = log4j::parse_or_degrade(&text, DEFAULT_LOGGER);
    let full = format!("{}_{}", queue.trim_start_matches('.'), msg.logger_name);
    msg.rebase(queue, full);
    msg
}

pub struct MsmqReceiver<Q = SpoolQueue> {
    config: MsmqConfig,
    queue: Arc<Q>,
    slot: SinkSlot,
    state: ReceiverState,
    worker: Option<Worker>,
}

impl MsmqReceiver<SpoolQueue> {
    pub fn new(config: MsmqConfig) -> Self {
        let queue = SpoolQueue::new(&config.spool_dir, config.queue_name.clone());
        Self::with_queue(config, queue)
    }
}

impl<Q: MessageQueue> MsmqReceiver<Q> {
    pub fn with_queue(config: MsmqConfig, queue: Q) -> Self {
        Self {
            config,
            queue: Arc::new(queue),
            slot: SinkSlot::new(ReceiverKind::Msmq),
            state: ReceiverState::Idle,
            worker: None,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }
}

impl<Q: MessageQueue> Receiver for MsmqReceiver<Q> {
    fn kind(&self) -> ReceiverKind {
        ReceiverKind::Msmq
    }

    fn display_name(&self) -> String {
        display_name(self.kind(), self.config.name.as_deref())
    }

    fn sample_client_config(&self) -> String {
        format!(
            "Configuration for NLog:\n\
             <target name=\"queue\" xsi:type=\"File\" layout=\"${{log4jxmlevent}}\"\n\
             \tfileName=\"{}/${{ticks}}.msg\" />",
            self.config.spool_dir.join(&self.config.queue_name).display()
        )
    }

    fn state(&self) -> ReceiverState {
        self.state.clone()
    }

    async fn initialize(&mut self) -> Result<(), ReceiverError> {
        if self.worker.is_some() {
            return Ok(());
        }
        if self.config.create {
            let created = match self.queue.exists().await {
                Ok(true) => Ok(()),
                Ok(false) => self.queue.create().await,
                Err(e) => Err(e),
            };
            if let Err(e) = created {
                self.state = ReceiverState::Failed(e.to_string());
                return Err(e);
            }
        }

        info!(receiver = "msmq", queue = self.queue.name(), bulk = self.config.bulk, "starting");
        let worker = Worker::new();
        let timing = LoopTiming {
            poll: Duration::from_millis(self.config.poll_interval_ms),
            queue_check: Duration::from_millis(self.config.queue_check_interval_ms),
        };
        worker.spawn(receive_loop(
            Arc::clone(&self.queue),
            self.slot.clone(),
            self.config.bulk,
            self.config.create,
            timing,
            worker.token(),
        ));
        self.worker = Some(worker);
        self.state = ReceiverState::Listening;
        Ok(())
    }

    async fn terminate(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(receiver = "msmq", queue = self.queue.name(), "terminated");
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

#[derive(Debug, Clone, Copy)]
struct LoopTiming {
    poll: Duration,
    queue_check: Duration,
}

/// Sleeps unless cancelled; returns `false` on cancellation.
async fn pause(period: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(period) => true,
        () = cancel.cancelled() => false,
    }
}

/// Returns `false` when cancelled before the queue became available.
async fn wait_for_queue<Q: MessageQueue>(
    queue: &Q,
    create: bool,
    period: Duration,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let ready = match queue.exists().await {
            Ok(true) => Ok(true),
            Ok(false) if create => queue.create().await.map(|()| true),
            Ok(false) => Ok(false),
            Err(e) => Err(e),
        };
        match ready {
            Ok(true) => return true,
            Ok(false) => {
                debug!(receiver = "msmq", queue = queue.name(), "queue not found, checking again later");
            }
            Err(e) => warn!(receiver = "msmq", queue = queue.name(), error = %e, "queue check failed"),
        }
        if !pause(period, cancel).await {
            return false;
        }
    }
}

async fn receive_loop<Q: MessageQueue>(
    queue: Arc<Q>,
    slot: SinkSlot,
    bulk: bool,
    create: bool,
    timing: LoopTiming,
    cancel: CancellationToken,
) {
    while wait_for_queue(&*queue, create, timing.queue_check, &cancel).await {
        info!(receiver = "msmq", queue = queue.name(), "receiving");
        match receive(&*queue, &slot, bulk, timing.poll, &cancel).await {
            Ok(()) => return,
            Err(e) => {
                warn!(receiver = "msmq", queue = queue.name(), error = %e, "queue error, waiting for the queue");
                if !pause(timing.poll, &cancel).await {
                    return;
                }
            }
        }
    }
}

/// Receives until cancelled (`Ok`) or the queue fails (`Err`).
async fn receive<Q: MessageQueue>(
    queue: &Q,
    slot: &SinkSlot,
    bulk: bool,
    poll: Duration,
    cancel: &CancellationToken,
) -> Result<(), ReceiverError> {
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        // leave messages queued until someone is listening
        if !slot.is_attached() {
            if !pause(poll, cancel).await {
                return Ok(());
            }
            continue;
        }

        let Some(body) = queue.try_receive().await? else {
            if !pause(poll, cancel).await {
                return Ok(());
            }
            continue;
        };
        slot.deliver(queue_message(&body, queue.name()));

        if bulk {
            let backlog: Vec<LogMessage> = queue
                .receive_up_to(MAX_BULK)
                .await?
                .iter()
                .map(|body| queue_message(body, queue.name()))
                .collect();
            if !backlog.is_empty() {
                debug!(receiver = "msmq", count = backlog.len(), "delivering backlog");
                slot.deliver_batch(backlog);
            }
        }
    }
}
