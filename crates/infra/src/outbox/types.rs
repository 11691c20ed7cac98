//! Outbox message model and status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Unique outbox message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxMessageId(pub Uuid);

impl OutboxMessageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for OutboxMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbox message status.
///
/// Transitions are strictly `Pending → Processing → {Completed | Pending
/// (retry) | Failed}`. `Failed` is terminal: once a message's retry count
/// reaches the configured ceiling it is never retried automatically and
/// waits for operator attention (dead-letter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Staged, waiting to be published (or requeued for retry).
    Pending,
    /// Picked up by the processor, publish in flight.
    Processing,
    /// Published successfully.
    Completed,
    /// Retry ceiling reached; dead-lettered.
    Failed,
}

impl OutboxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutboxStatus::Completed | OutboxStatus::Failed)
    }
}

/// A durable record of one pending change notification.
///
/// Created when a state change must be announced externally; finished only
/// when it reaches `Completed` or terminal `Failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: OutboxMessageId,
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: String,
    pub payload: JsonValue,
    pub topic: String,
    pub status: OutboxStatus,
    /// Incremented only when a publish attempt fails and the message is
    /// requeued.
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl OutboxMessage {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            id: OutboxMessageId::new(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            event_type: event_type.into(),
            payload,
            topic: topic.into(),
            status: OutboxStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            processed_at: None,
            error_message: None,
        }
    }

    /// Mark the publish attempt as in flight.
    pub fn mark_processing(&mut self) {
        self.status = OutboxStatus::Processing;
    }

    /// Mark the publish as done.
    pub fn mark_completed(&mut self) {
        self.status = OutboxStatus::Completed;
        self.processed_at = Some(Utc::now());
    }

    /// Record a failed publish attempt and requeue for the next poll.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = OutboxStatus::Pending;
        self.retry_count += 1;
        self.error_message = Some(error.into());
    }

    /// Dead-letter the message; it will never be retried automatically.
    pub fn mark_dead(&mut self, error: impl Into<String>) {
        self.status = OutboxStatus::Failed;
        self.processed_at = Some(Utc::now());
        self.error_message = Some(error.into());
    }
}
