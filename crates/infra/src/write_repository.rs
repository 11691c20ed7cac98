//! Write-side repository for the Payment aggregate.
//!
//! Orchestrates the command-side pipeline: load history, rehydrate, append
//! the uncommitted buffer under optimistic concurrency, stage exactly one
//! CDC notification in the same logical unit of work, then mark the
//! aggregate committed. Command handlers sit outside this crate and only see
//! `load`/`save`.

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use wirepay_core::{AggregateRoot, DomainError, EventSourced, ExpectedVersion};
use wirepay_payments::{Payment, PaymentEvent, PaymentId};

use crate::cdc::{CdcPublishError, CdcPublisher, PAYMENT_ENTITY_TYPE, PaymentCdcData};
use crate::event_store::{EventStore, EventStoreError, UncommittedEvent};

/// Write repository error, split into the kinds command callers care about:
/// `Conflict` is retryable (reload and re-run the command), `NotFound` is
/// not, everything else is infrastructure.
#[derive(Debug, Error)]
pub enum WriteRepositoryError {
    /// Optimistic concurrency failure; reload the aggregate and retry.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// No stream exists for the requested payment.
    #[error("payment not found")]
    NotFound,

    /// Stored payloads could not be read back into domain events.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    /// The loaded stream violates stream invariants.
    #[error("invalid event stream: {0}")]
    InvalidStream(String),

    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),

    /// Staging/publishing the change notification failed. The events are
    /// already appended but the save is reported as failed: the change must
    /// not be considered committed if its notification cannot be staged.
    #[error("change notification failed: {0}")]
    Notification(#[from] CdcPublishError),
}

impl From<EventStoreError> for WriteRepositoryError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => WriteRepositoryError::Conflict(msg),
            EventStoreError::AggregateNotFound(_) => WriteRepositoryError::NotFound,
            other => WriteRepositoryError::Store(other),
        }
    }
}

/// Command-side repository: event store for persistence, CDC publisher for
/// read-side notification. Both collaborators are injected at construction.
pub struct PaymentWriteRepository<S, C> {
    store: S,
    cdc: C,
}

impl<S, C> PaymentWriteRepository<S, C> {
    pub fn new(store: S, cdc: C) -> Self {
        Self { store, cdc }
    }

    pub fn into_parts(self) -> (S, C) {
        (self.store, self.cdc)
    }
}

impl<S, C> PaymentWriteRepository<S, C>
where
    S: EventStore,
    C: CdcPublisher,
{
    /// Rehydrate a payment by replaying its committed stream.
    pub fn load(&self, payment_id: PaymentId) -> Result<Payment, WriteRepositoryError> {
        let mut history = self.store.load_stream(payment_id.0)?;
        // Deterministic replay order even if a backend misbehaves.
        history.sort_by_key(|e| e.sequence_number);

        let events = history
            .iter()
            .map(|stored| {
                serde_json::from_value::<PaymentEvent>(stored.payload.clone())
                    .map_err(|e| WriteRepositoryError::Deserialize(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let payment = Payment::from_history(payment_id, &events)
            .map_err(|e: DomainError| WriteRepositoryError::InvalidStream(e.to_string()))?;

        debug!(
            payment_id = %payment_id,
            version = payment.version(),
            "payment rehydrated from event stream"
        );
        Ok(payment)
    }

    /// Persist the aggregate's uncommitted buffer and stage its change
    /// notification.
    ///
    /// Returns the stream's new version. A no-op when the buffer is empty.
    pub fn save(&self, payment: &mut Payment) -> Result<u64, WriteRepositoryError> {
        let pending = payment.uncommitted_events().to_vec();
        if pending.is_empty() {
            return Ok(payment.version());
        }

        let payment_id = payment.payment_id();
        let expected = ExpectedVersion::for_aggregate_version(payment.version());
        let was_new = payment.version() == 0;

        let uncommitted = pending
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    payment_id.0,
                    PAYMENT_ENTITY_TYPE,
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(WriteRepositoryError::from)?;

        let committed = self.store.append(uncommitted, expected)?;
        let new_version = committed
            .last()
            .map(|e| e.sequence_number)
            .unwrap_or_else(|| payment.version());

        // Stage the CDC notification before reporting success: in-memory
        // this is ordered writes, a persisted deployment shares a
        // transaction with the append.
        self.stage_notification(payment, &pending, was_new, new_version)?;

        payment.mark_committed(new_version);
        info!(
            payment_id = %payment_id,
            version = new_version,
            events = pending.len(),
            "payment saved"
        );
        Ok(new_version)
    }

    fn stage_notification(
        &self,
        payment: &Payment,
        pending: &[PaymentEvent],
        was_new: bool,
        new_version: u64,
    ) -> Result<(), WriteRepositoryError> {
        let entity_id = payment.payment_id().to_string();
        let removed = pending.iter().any(|e| matches!(e, PaymentEvent::Removed(_)));

        if removed {
            self.cdc
                .publish_delete(PAYMENT_ENTITY_TYPE, &entity_id, new_version)?;
            return Ok(());
        }

        let data = PaymentCdcData::from_payment(payment, new_version).ok_or_else(|| {
            WriteRepositoryError::InvalidStream("payment has no placement to capture".to_string())
        })?;

        if was_new {
            self.cdc
                .publish_create(PAYMENT_ENTITY_TYPE, &entity_id, data, new_version)?;
        } else {
            self.cdc
                .publish_update(PAYMENT_ENTITY_TYPE, &entity_id, data, None, new_version)?;
        }
        Ok(())
    }
}
