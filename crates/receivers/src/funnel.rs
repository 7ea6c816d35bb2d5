//! Notification funnel between receivers and the single consumer.
//!
//! Every receiver delivers into one shared [`Funnel`]. A consumer task drains
//! it on a fixed period and hands each batch to a [`MessageConsumer`].
//!
//! # Overflow
//! The queue is bounded. Once `capacity` is reached:
//! - [`DropPolicy::Oldest`]: the oldest queued message is evicted
//! - [`DropPolicy::Newest`]: the incoming message is rejected
//!
//! A warning is logged when the queue starts overflowing, not per dropped
//! message. The next drain ends the overflow.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use log2console_core::config::{DropPolicy, FunnelConfig};
use log2console_core::message::LogMessage;
use log2console_core::metrics as m;
use log2console_core::sink::LogMessageSink;

/// Default drain period.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Queue {
    messages: VecDeque<LogMessage>,
    received: u64,
    dropped: u64,
    overflowing: bool,
}

impl Queue {
    /// Returns `true` when `dropped` starts a new overflow.
    fn note_drops(&mut self, dropped: u64) -> bool {
        dropped > 0 && !std::mem::replace(&mut self.overflowing, true)
    }
}

/// Bounded multi-producer queue of log messages.
///
/// Each `notify` / `notify_batch` call mutates the queue under one lock, so
/// a batch never interleaves with another producer's messages.
pub struct Funnel {
    queue: Mutex<Queue>,
    capacity: usize,
    drop_policy: DropPolicy,
}

impl Funnel {
    pub fn new(capacity: usize, drop_policy: DropPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(Queue {
                messages: VecDeque::with_capacity(capacity.min(10_000)),
                ..Queue::default()
            }),
            capacity,
            drop_policy,
        }
    }

    pub fn from_config(config: &FunnelConfig) -> Self {
        Self::new(config.capacity, config.drop_policy)
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        // a panicking producer leaves the queue itself intact
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends under an already held lock; returns the number dropped.
    fn push_locked(&self, queue: &mut Queue, message: LogMessage) -> u64 {
        queue.received += 1;
        if queue.messages.len() < self.capacity {
            queue.messages.push_back(message);
            return 0;
        }
        match self.drop_policy {
            DropPolicy::Oldest => {
                queue.messages.pop_front();
                queue.messages.push_back(message);
            }
            DropPolicy::Newest => {}
        }
        queue.dropped += 1;
        1
    }

    fn record(&self, depth: usize, dropped_now: u64, dropped_total: u64, overflow_started: bool) {
        metrics::gauge!(m::FUNNEL_DEPTH).set(depth as f64);
        if dropped_now > 0 {
            metrics::counter!(m::FUNNEL_DROPPED_TOTAL).increment(dropped_now);
        }
        if overflow_started {
            warn!(
                dropped_total,
                capacity = self.capacity,
                policy = %self.drop_policy,
                "funnel full, dropping messages until the next drain"
            );
        }
    }

    /// Takes every queued message in FIFO order and empties the queue.
    pub fn drain(&self) -> Vec<LogMessage> {
        let (batch, overflowed, dropped_total) = {
            let mut queue = self.lock();
            let batch: Vec<LogMessage> = queue.messages.drain(..).collect();
            let overflowed = std::mem::take(&mut queue.overflowing);
            (batch, overflowed, queue.dropped)
        };
        metrics::gauge!(m::FUNNEL_DEPTH).set(0.0);
        if overflowed {
            info!(dropped_total, "funnel drained, overflow over");
        }
        if !batch.is_empty() {
            metrics::counter!(m::FUNNEL_DRAINED_TOTAL).increment(batch.len() as u64);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    pub fn total_received(&self) -> u64 {
        self.lock().received
    }

    /// Whether messages were dropped since the last drain.
    pub fn is_overflowing(&self) -> bool {
        self.lock().overflowing
    }

    /// Spawns the consumer task.
    ///
    /// Every `interval` the task drains the funnel, releases the lock and
    /// passes the batch to `consumer`. Empty drains are skipped. On
    /// cancellation it drains one last time before returning.
    pub fn spawn_consumer<C>(
        self: &Arc<Self>,
        interval: Duration,
        mut consumer: C,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        C: MessageConsumer + 'static,
    {
        let funnel = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let batch = funnel.drain();
                        if !batch.is_empty() {
                            consumer.consume(batch);
                        }
                    }
                    () = cancel.cancelled() => {
                        let batch = funnel.drain();
                        debug!(remaining = batch.len(), "funnel consumer stopping");
                        if !batch.is_empty() {
                            consumer.consume(batch);
                        }
                        break;
                    }
                }
            }
        })
    }
}

impl Default for Funnel {
    fn default() -> Self {
        Self::from_config(&FunnelConfig::default())
    }
}

impl LogMessageSink for Funnel {
    fn notify(&self, message: LogMessage) {
        let (depth, dropped, total, started) = {
            let mut queue = self.lock();
            let dropped = self.push_locked(&mut queue, message);
            let started = queue.note_drops(dropped);
            (queue.messages.len(), dropped, queue.dropped, started)
        };
        self.record(depth, dropped, total, started);
    }

    fn notify_batch(&self, messages: Vec<LogMessage>) {
        if messages.is_empty() {
            return;
        }
        let (depth, dropped, total, started) = {
            let mut queue = self.lock();
            let mut dropped = 0;
            for message in messages {
                dropped += self.push_locked(&mut queue, message);
            }
            let started = queue.note_drops(dropped);
            (queue.messages.len(), dropped, queue.dropped, started)
        };
        self.record(depth, dropped, total, started);
    }
}

/// Receives drained batches on the consumer task.
pub trait MessageConsumer: Send {
    fn consume(&mut self, batch: Vec<LogMessage>);
}

impl<F> MessageConsumer for F
where
    F: FnMut(Vec<LogMessage>) + Send,
{
    fn consume(&mut self, batch: Vec<LogMessage>) {
        self(batch)
    }
}
