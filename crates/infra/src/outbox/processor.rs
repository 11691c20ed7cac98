//! Background outbox publisher with retry and dead-lettering.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use wirepay_events::MessageBus;

use super::store::{OutboxStore, OutboxStoreError};
use super::types::OutboxMessage;

/// Outbox processor configuration.
///
/// Poll interval and retry ceiling are operational tuning, not part of the
/// core contract; defaults follow the reference deployment (5 s / 100 / 3).
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    /// How often to poll for pending messages.
    pub poll_interval: Duration,
    /// Maximum messages fetched per poll.
    pub batch_size: usize,
    /// Publish attempts allowed before a message is dead-lettered.
    pub retry_ceiling: u32,
    /// Name for logging and the worker thread.
    pub name: String,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 100,
            retry_ceiling: 3,
            name: "outbox-processor".to_string(),
        }
    }
}

impl OutboxProcessorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }
}

/// Handle to control and join a running processor.
#[derive(Debug)]
pub struct OutboxProcessorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl OutboxProcessorHandle {
    /// Request graceful shutdown and wait for the processor to stop.
    ///
    /// The in-flight batch is finished before the thread exits.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Outcome counts for one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Background publisher for staged outbox messages.
///
/// Single logical worker: running multiple instances against one store would
/// require per-message leasing to avoid double-sends. Delivery is
/// at-least-once: a crash between publish and `mark_completed` replays the
/// message on the next pass, so downstream consumers must be idempotent.
pub struct OutboxProcessor<S, B> {
    store: S,
    bus: B,
    config: OutboxProcessorConfig,
}

impl<S, B> OutboxProcessor<S, B>
where
    S: OutboxStore + Send + 'static,
    B: MessageBus + Send + 'static,
{
    pub fn new(store: S, bus: B, config: OutboxProcessorConfig) -> Self {
        Self { store, bus, config }
    }

    /// Fetch and process one pending batch (deterministic; used by tests and
    /// by the background loop).
    pub fn process_once(&self) -> Result<PassStats, OutboxStoreError> {
        let batch = self.store.pending(self.config.batch_size)?;
        let mut stats = PassStats::default();

        for message in batch {
            if message.retry_count >= self.config.retry_ceiling {
                warn!(
                    message_id = %message.id,
                    entity_type = %message.entity_type,
                    retry_count = message.retry_count,
                    "outbox message exceeded retry ceiling, dead-lettering"
                );
                self.store.mark_dead(message.id, "retry ceiling reached")?;
                stats.dead_lettered += 1;
                continue;
            }

            self.store.mark_processing(message.id)?;
            match self.publish(&message) {
                Ok(()) => {
                    self.store.mark_completed(message.id)?;
                    stats.published += 1;
                    info!(
                        message_id = %message.id,
                        entity_type = %message.entity_type,
                        topic = %message.topic,
                        "outbox message published"
                    );
                }
                Err(error) => {
                    warn!(
                        message_id = %message.id,
                        entity_type = %message.entity_type,
                        topic = %message.topic,
                        error = %error,
                        "outbox publish failed, message requeued"
                    );
                    self.store.mark_failed(message.id, &error)?;
                    stats.failed += 1;
                }
            }
        }

        let pending = self.store.pending_count()?;
        if pending > 0 {
            debug!(pending, "outbox messages still pending");
        }

        Ok(stats)
    }

    fn publish(&self, message: &OutboxMessage) -> Result<(), String> {
        // The entity id keys the partition so per-entity ordering holds.
        self.bus
            .publish(&message.topic, &message.entity_id, message.payload.clone())
            .map_err(|e| e.to_string())
    }

    /// Spawn the processing loop on a named background thread.
    pub fn spawn(self) -> OutboxProcessorHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let name = self.config.name.clone();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || processor_loop(self, shutdown_rx))
            .expect("failed to spawn outbox processor thread");

        OutboxProcessorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn processor_loop<S, B>(processor: OutboxProcessor<S, B>, shutdown_rx: mpsc::Receiver<()>)
where
    S: OutboxStore + Send + 'static,
    B: MessageBus + Send + 'static,
{
    info!(processor = %processor.config.name, "outbox processor started");

    loop {
        if let Err(e) = processor.process_once() {
            warn!(processor = %processor.config.name, error = %e, "outbox pass failed");
        }

        // Sleep until the next poll, waking early on shutdown. The current
        // batch has already been finished at this point.
        match shutdown_rx.recv_timeout(processor.config.poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
        }
    }

    info!(processor = %processor.config.name, "outbox processor stopped");
}
