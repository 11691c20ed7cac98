//! Transactional outbox: durable staging of outbound change notifications.
//!
//! ## Design
//!
//! - A state change stages its notification as a Pending [`OutboxMessage`]
//!   in the same logical unit of work as the event-store append.
//! - A background [`OutboxProcessor`] polls pending messages oldest-first,
//!   publishes them to the broker (entity id as partition key) and records
//!   the outcome.
//! - Failed publishes requeue with an incremented retry count; at the
//!   configured ceiling a message becomes terminal `Failed` (dead-letter).
//!
//! The result is at-least-once delivery that survives broker outages without
//! losing or duplicating the underlying state change.

pub mod processor;
pub mod store;
pub mod types;

pub use processor::{OutboxProcessor, OutboxProcessorConfig, OutboxProcessorHandle, PassStats};
pub use store::{InMemoryOutboxStore, OutboxStore, OutboxStoreError};
pub use types::{OutboxMessage, OutboxMessageId, OutboxStatus};
