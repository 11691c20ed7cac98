//! In-process event publishing/subscription (mechanics only).
//!
//! The event bus is the **distribution layer** for events after they have
//! been persisted: the event store appends first, then publishes committed
//! envelopes to the bus for in-process consumers (notification handlers,
//! diagnostics, workers). It is intentionally lightweight:
//!
//! - **Broadcast semantics**: each subscriber gets a copy of every message
//! - **At-least-once acceptable**: consumers must be idempotent
//! - **No persistence**: the event store is the source of truth
//!
//! This is distinct from the partitioned broker contract in [`crate::broker`],
//! which carries CDC envelopes across process boundaries.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of all events published to the bus.
/// Designed for single-threaded consumption; a worker typically loops on
/// `recv_timeout` so it can interleave shutdown checks.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// `publish()` can fail (e.g. lock poisoning, transport error); failures are
/// surfaced to the caller. Since events are already persisted when they reach
/// the bus, retrying publication is safe.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
