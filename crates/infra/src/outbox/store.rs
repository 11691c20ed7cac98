//! Outbox storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::types::{OutboxMessage, OutboxMessageId, OutboxStatus};

/// Outbox store abstraction.
///
/// `enqueue` must be callable from the same logical unit of work as the
/// event-store append, so that either both persist or neither does. The
/// in-memory implementation approximates this by ordering writes before the
/// write repository reports success; a persisted deployment requires a
/// shared transaction; the in-memory behavior is a stand-in and is **not
/// crash-safe**.
pub trait OutboxStore: Send + Sync {
    /// Stage a pending message.
    fn enqueue(&self, message: OutboxMessage) -> Result<OutboxMessageId, OutboxStoreError>;

    /// Up to `batch_size` pending messages, oldest first (FIFO fairness).
    /// Statuses are left unchanged until explicitly transitioned.
    fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError>;

    fn mark_processing(&self, id: OutboxMessageId) -> Result<(), OutboxStoreError>;

    fn mark_completed(&self, id: OutboxMessageId) -> Result<(), OutboxStoreError>;

    /// Record a failed publish attempt: increments the retry count and
    /// requeues the message for the next poll.
    fn mark_failed(&self, id: OutboxMessageId, error: &str) -> Result<(), OutboxStoreError>;

    /// Dead-letter a message (terminal `Failed`).
    fn mark_dead(&self, id: OutboxMessageId, error: &str) -> Result<(), OutboxStoreError>;

    /// Get a message by id (operational visibility, tests).
    fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxStoreError>;

    /// Number of messages currently pending.
    fn pending_count(&self) -> Result<usize, OutboxStoreError>;
}

/// Outbox store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OutboxStoreError {
    #[error("outbox message not found: {0}")]
    NotFound(OutboxMessageId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory outbox store for tests/dev and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    messages: RwLock<HashMap<OutboxMessageId, OutboxMessage>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn with_message<R>(
        &self,
        id: OutboxMessageId,
        f: impl FnOnce(&mut OutboxMessage) -> R,
    ) -> Result<R, OutboxStoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))?;
        let message = messages.get_mut(&id).ok_or(OutboxStoreError::NotFound(id))?;
        Ok(f(message))
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn enqueue(&self, message: OutboxMessage) -> Result<OutboxMessageId, OutboxStoreError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))?;
        let id = message.id;
        messages.insert(id, message);
        Ok(id)
    }

    fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))?;

        let mut pending: Vec<OutboxMessage> = messages
            .values()
            .filter(|m| m.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        // UUIDv7 ids are time-ordered; they break created_at ties so FIFO
        // stays deterministic.
        pending.sort_by_key(|m| (m.created_at, m.id.0));
        pending.truncate(batch_size);
        Ok(pending)
    }

    fn mark_processing(&self, id: OutboxMessageId) -> Result<(), OutboxStoreError> {
        self.with_message(id, |m| m.mark_processing())
    }

    fn mark_completed(&self, id: OutboxMessageId) -> Result<(), OutboxStoreError> {
        self.with_message(id, |m| m.mark_completed())
    }

    fn mark_failed(&self, id: OutboxMessageId, error: &str) -> Result<(), OutboxStoreError> {
        self.with_message(id, |m| m.mark_failed(error))
    }

    fn mark_dead(&self, id: OutboxMessageId, error: &str) -> Result<(), OutboxStoreError> {
        self.with_message(id, |m| m.mark_dead(error))
    }

    fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxStoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))?;
        Ok(messages.get(&id).cloned())
    }

    fn pending_count(&self) -> Result<usize, OutboxStoreError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| OutboxStoreError::Storage("lock poisoned".to_string()))?;
        Ok(messages
            .values()
            .filter(|m| m.status == OutboxStatus::Pending)
            .count())
    }
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn enqueue(&self, message: OutboxMessage) -> Result<OutboxMessageId, OutboxStoreError> {
        (**self).enqueue(message)
    }

    fn pending(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        (**self).pending(batch_size)
    }

    fn mark_processing(&self, id: OutboxMessageId) -> Result<(), OutboxStoreError> {
        (**self).mark_processing(id)
    }

    fn mark_completed(&self, id: OutboxMessageId) -> Result<(), OutboxStoreError> {
        (**self).mark_completed(id)
    }

    fn mark_failed(&self, id: OutboxMessageId, error: &str) -> Result<(), OutboxStoreError> {
        (**self).mark_failed(id, error)
    }

    fn mark_dead(&self, id: OutboxMessageId, error: &str) -> Result<(), OutboxStoreError> {
        (**self).mark_dead(id, error)
    }

    fn get(&self, id: OutboxMessageId) -> Result<Option<OutboxMessage>, OutboxStoreError> {
        (**self).get(id)
    }

    fn pending_count(&self) -> Result<usize, OutboxStoreError> {
        (**self).pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(entity_id: &str) -> OutboxMessage {
        OutboxMessage::new("payment", entity_id, "cdc.payment.create", "cdc.payment", json!({}))
    }

    #[test]
    fn pending_is_fifo_and_respects_batch_size() {
        let store = InMemoryOutboxStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut m = message(&format!("p-{i}"));
            // Spread created_at so ordering is unambiguous.
            m.created_at = m.created_at + chrono::Duration::milliseconds(i);
            ids.push(store.enqueue(m).unwrap());
        }

        let batch = store.pending(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, ids[0]);
        assert_eq!(batch[1].id, ids[1]);
    }

    #[test]
    fn transitions_update_the_stored_message() {
        let store = InMemoryOutboxStore::new();
        let id = store.enqueue(message("p-1")).unwrap();

        store.mark_processing(id).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().status, OutboxStatus::Processing);
        assert_eq!(store.pending_count().unwrap(), 0);

        store.mark_failed(id, "publish failed").unwrap();
        let failed = store.get(id).unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Pending);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(store.pending_count().unwrap(), 1);

        store.mark_processing(id).unwrap();
        store.mark_completed(id).unwrap();
        let done = store.get(id).unwrap().unwrap();
        assert_eq!(done.status, OutboxStatus::Completed);
        assert!(done.processed_at.is_some());
    }

    #[test]
    fn dead_lettered_message_is_not_pending() {
        let store = InMemoryOutboxStore::new();
        let id = store.enqueue(message("p-1")).unwrap();
        store.mark_dead(id, "retry ceiling reached").unwrap();

        assert!(store.pending(10).unwrap().is_empty());
        assert_eq!(store.get(id).unwrap().unwrap().status, OutboxStatus::Failed);
    }

    #[test]
    fn marking_a_missing_message_is_not_found() {
        let store = InMemoryOutboxStore::new();
        let err = store.mark_completed(OutboxMessageId::new()).unwrap_err();
        assert!(matches!(err, OutboxStoreError::NotFound(_)));
    }
}
