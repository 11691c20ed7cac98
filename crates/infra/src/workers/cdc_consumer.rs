use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

use wirepay_events::broker::BrokerSubscription;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// An in-flight delivery is handled (and acked on success) before the
    /// thread exits.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic CDC consumer loop bound to one topic subscription.
///
/// - Polls the subscription with a short tick so shutdown stays responsive
/// - Runs an idempotent handler for each delivery
/// - **Acks only after the handler succeeded**; a failed handler leaves the
///   delivery unacked, so the broker redelivers it after the visibility
///   timeout. A handler error costs one iteration, never the loop
#[derive(Debug)]
pub struct CdcConsumerWorker;

impl CdcConsumerWorker {
    /// Spawn a worker thread consuming from `subscription`.
    ///
    /// `handler` must be idempotent (at-least-once delivery safe).
    pub fn spawn<H, E>(
        name: &'static str,
        subscription: Box<dyn BrokerSubscription>,
        handler: H,
    ) -> WorkerHandle
    where
        H: FnMut(&JsonValue) -> Result<(), E> + Send + 'static,
        E: core::fmt::Debug + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || consumer_loop(name, subscription, shutdown_rx, handler))
            .expect("failed to spawn CDC consumer thread");

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

fn consumer_loop<H, E>(
    name: &'static str,
    mut subscription: Box<dyn BrokerSubscription>,
    shutdown_rx: mpsc::Receiver<()>,
    mut handler: H,
) where
    H: FnMut(&JsonValue) -> Result<(), E>,
    E: core::fmt::Debug,
{
    let tick = Duration::from_millis(250);
    info!(worker = name, "CDC consumer started");

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match subscription.poll(tick) {
            Ok(Some(delivery)) => match handler(&delivery.payload) {
                Ok(()) => {
                    if let Err(err) = subscription.ack(&delivery.token) {
                        warn!(worker = name, error = %err, "failed to ack delivery");
                    }
                }
                Err(err) => {
                    // No ack: the delivery comes back after the visibility
                    // timeout and the idempotent handler reapplies it.
                    warn!(worker = name, key = %delivery.key, error = ?err, "CDC handler failed");
                }
            },
            Ok(None) => continue,
            Err(err) => {
                warn!(worker = name, error = %err, "CDC poll failed");
                thread::sleep(tick);
            }
        }
    }

    info!(worker = name, "CDC consumer stopped");
}
