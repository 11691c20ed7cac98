//! Partitioned, key-ordered message broker contract.
//!
//! This is the boundary the write side publishes change notifications to and
//! the read side consumes from. The contract is deliberately narrow so that
//! in-memory (tests/dev) and durable (Redis Streams, Kafka-style) backends
//! are interchangeable:
//!
//! - `publish(topic, key, payload)`: messages with the same `key` land on the
//!   same ordered partition. Per-entity ordering is guaranteed, global
//!   ordering is not.
//! - `subscribe(topic)`: pull-based consumption with **explicit
//!   acknowledgement**. Delivery is at-least-once: an unacknowledged message
//!   is redelivered after a visibility timeout, and a fresh subscription
//!   (consumer restart) re-reads the topic from the beginning. Consumers must
//!   be idempotent.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Broker operation error.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("acknowledge failed: {0}")]
    Ack(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Opaque handle identifying one delivery for acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckToken {
    /// Partition-relative offset (in-memory backend).
    PartitionOffset { partition: usize, offset: u64 },
    /// Backend-issued receipt (e.g. a stream entry id).
    Receipt(String),
}

/// One message handed to a consumer, acknowledged via its token.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub key: String,
    pub payload: JsonValue,
    pub token: AckToken,
}

/// Pull-based consumption of one topic.
///
/// A consumer loop polls, processes, then acks. Acknowledging only after the
/// processing side effect succeeded is what makes crash recovery safe: a
/// crash mid-processing leaves the delivery unacked and it comes back.
pub trait BrokerSubscription: Send {
    /// Wait up to `timeout` for the next delivery.
    ///
    /// Returns `Ok(None)` when nothing became available in time. Expired
    /// unacknowledged deliveries are returned again before new ones.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError>;

    /// Mark a delivery as processed; it will not be redelivered.
    fn ack(&mut self, token: &AckToken) -> Result<(), BrokerError>;
}

/// Partitioned, key-ordered append-only message log.
pub trait MessageBus: Send + Sync {
    fn publish(&self, topic: &str, key: &str, payload: JsonValue) -> Result<(), BrokerError>;

    fn subscribe(&self, topic: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError>;
}

impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    fn publish(&self, topic: &str, key: &str, payload: JsonValue) -> Result<(), BrokerError> {
        (**self).publish(topic, key, payload)
    }

    fn subscribe(&self, topic: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        (**self).subscribe(topic)
    }
}
