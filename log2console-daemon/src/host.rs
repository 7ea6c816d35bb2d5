//! Receiver host -- builds receivers from configuration, wires them to the
//! funnel and manages their lifecycle.
//!
//! # Startup
//!
//! 1. Every enabled `[[receivers]]` entry is built through the registry.
//!    Invalid settings abort startup.
//! 2. The funnel consumer task is spawned.
//! 3. Each receiver is attached to the funnel and initialized. A receiver
//!    that fails to initialize is terminated and marked failed; the others
//!    keep running.
//!
//! # Shutdown
//!
//! Receivers are terminated in declaration order, then the consumer task
//! drains the funnel one last time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use log2console_core::config::Log2ConsoleConfig;
use log2console_core::metrics as m;
use log2console_core::sink::LogMessageSink;
use log2console_receivers::{DynReceiver, Funnel, MessageConsumer, ReceiverRegistry, ReceiverState};

/// One configured receiver and the state the host last observed for it.
pub struct HostedReceiver {
    kind: String,
    receiver: Box<dyn DynReceiver>,
    status: ReceiverState,
}

impl HostedReceiver {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn display_name(&self) -> String {
        self.receiver.display_name()
    }

    pub fn status(&self) -> &ReceiverState {
        &self.status
    }
}

pub struct Host {
    config: Log2ConsoleConfig,
    funnel: Arc<Funnel>,
    receivers: Vec<HostedReceiver>,
    cancel: CancellationToken,
    consumer: Option<JoinHandle<()>>,
}

impl Host {
    /// Builds every enabled receiver. Nothing is started yet.
    pub fn build(config: Log2ConsoleConfig, registry: &ReceiverRegistry) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let mut receivers = Vec::new();
        for (idx, entry) in config.receivers.iter().enumerate() {
            if !entry.enabled {
                tracing::debug!(index = idx, kind = %entry.kind, "receiver disabled, skipping");
                continue;
            }
            let receiver = registry
                .create(&entry.kind, &entry.settings_value())
                .map_err(|e| anyhow::anyhow!("receivers[{}] ({}): {}", idx, entry.kind, e))?;
            tracing::debug!(index = idx, receiver = %receiver.display_name(), "receiver built");
            receivers.push(HostedReceiver {
                kind: entry.kind.clone(),
                receiver,
                status: ReceiverState::Idle,
            });
        }

        let funnel = Arc::new(Funnel::from_config(&config.funnel));
        tracing::info!(
            receivers = receivers.len(),
            capacity = funnel.capacity(),
            drop_policy = %config.funnel.drop_policy,
            "host built"
        );

        Ok(Self {
            config,
            funnel,
            receivers,
            cancel: CancellationToken::new(),
            consumer: None,
        })
    }

    pub fn funnel(&self) -> &Arc<Funnel> {
        &self.funnel
    }

    pub fn receivers(&self) -> &[HostedReceiver] {
        &self.receivers
    }

    /// Spawns the consumer and initializes every receiver.
    ///
    /// Returns the number of receivers that are listening.
    pub async fn start<C>(&mut self, consumer: C) -> usize
    where
        C: MessageConsumer + 'static,
    {
        if self.consumer.is_none() {
            let interval = Duration::from_millis(self.config.funnel.drain_interval_ms);
            self.consumer = Some(self.funnel.spawn_consumer(
                interval,
                consumer,
                self.cancel.clone(),
            ));
        }

        let sink: Arc<dyn LogMessageSink> = self.funnel.clone();
        let mut listening = 0;
        for hosted in &mut self.receivers {
            hosted.receiver.attach(Arc::clone(&sink));
            match hosted.receiver.initialize().await {
                Ok(()) => {
                    hosted.status = hosted.receiver.state();
                    if hosted.status.is_listening() {
                        listening += 1;
                    }
                    tracing::info!(receiver = %hosted.receiver.display_name(), state = %hosted.status, "receiver started");
                }
                Err(e) => {
                    hosted.receiver.terminate().await;
                    hosted.status = ReceiverState::Failed(e.to_string());
                    metrics::counter!(m::RECEIVER_INIT_FAILURES_TOTAL, m::LABEL_RECEIVER => hosted.kind.clone())
                        .increment(1);
                    tracing::error!(
                        receiver = %hosted.receiver.display_name(),
                        error = %e,
                        "receiver failed to initialize"
                    );
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(m::DAEMON_RECEIVERS_ACTIVE).set(listening as f64);
        listening
    }

    /// Terminates every receiver, then stops the consumer after a final drain.
    pub async fn shutdown(&mut self) {
        for hosted in &mut self.receivers {
            hosted.receiver.detach();
            hosted.receiver.terminate().await;
            if !matches!(hosted.status, ReceiverState::Failed(_)) {
                hosted.status = hosted.receiver.state();
            }
        }
        metrics::gauge!(m::DAEMON_RECEIVERS_ACTIVE).set(0.0);

        self.cancel.cancel();
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                tracing::error!(error = %e, "funnel consumer task failed");
            }
        }
        tracing::info!(dropped = self.funnel.dropped_count(), "host stopped");
    }

    /// Starts everything and blocks until SIGTERM or SIGINT.
    pub async fn run<C>(&mut self, consumer: C) -> Result<()>
    where
        C: MessageConsumer + 'static,
    {
        let listening = self.start(consumer).await;
        if listening == 0 && !self.receivers.is_empty() {
            tracing::warn!("no receiver is listening");
        }

        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Ctrl-C handler: {}", e))?;
    Ok("Ctrl-C")
}
