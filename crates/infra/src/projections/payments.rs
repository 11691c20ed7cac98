use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, warn};

use wirepay_core::{Currency, UserAccountId, UserId};
use wirepay_payments::{PaymentId, PaymentStatus};

use crate::cdc::{CdcEvent, CdcOperation, PaymentCdcData};
use crate::read_model::ReadModelStore;

/// Queryable payment read model record.
///
/// Denormalized superset of the write-side fields plus derived attributes
/// (`status_description`, `last_modified_date`). Owned exclusively by the
/// projection: Create/Update overwrite it wholesale, Delete removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReadModel {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub user_account_id: UserAccountId,
    pub source_currency: Currency,
    pub source_amount: i64,
    pub target_currency: Currency,
    pub target_amount: i64,
    pub exchange_rate_bps: u32,
    pub status: PaymentStatus,
    pub status_description: String,
    pub create_date: DateTime<Utc>,
    pub is_removed: bool,
    pub is_email_notification_sent: bool,
    pub last_modified_date: Option<DateTime<Utc>>,
}

impl PaymentReadModel {
    fn from_cdc_data(data: &PaymentCdcData) -> Self {
        Self {
            payment_id: data.payment_id,
            user_id: data.user_id,
            user_account_id: data.user_account_id,
            source_currency: data.source_currency,
            source_amount: data.source_amount,
            target_currency: data.target_currency,
            target_amount: data.target_amount,
            exchange_rate_bps: data.exchange_rate_bps,
            status: data.status,
            status_description: data.status.description().to_string(),
            create_date: data.create_date,
            is_removed: data.is_removed,
            is_email_notification_sent: data.is_email_notification_sent,
            last_modified_date: None,
        }
    }

    /// Merge the mutable fields of an Update into an existing record.
    fn merge_update(&mut self, data: &PaymentCdcData) {
        self.status = data.status;
        self.status_description = data.status.description().to_string();
        self.is_removed = data.is_removed;
        self.is_email_notification_sent = data.is_email_notification_sent;
        self.last_modified_date = Some(Utc::now());
    }
}

/// Payment projection error.
///
/// A failed application leaves the delivery unacknowledged so the broker
/// redelivers it; the consumer loop itself never dies on these.
#[derive(Debug, Error)]
pub enum PaymentProjectionError {
    #[error("failed to deserialize CDC envelope: {0}")]
    Deserialize(String),

    #[error("CDC {operation} envelope for {entity_id} carries no data")]
    MissingData {
        operation: CdcOperation,
        entity_id: String,
    },

    #[error("invalid entity id '{0}' in CDC envelope")]
    InvalidEntityId(String),
}

/// Projects payment CDC envelopes into the read model.
///
/// All three operations are idempotent by construction, which is what makes
/// at-least-once delivery safe:
/// - duplicate Create → same upsert
/// - Update without a prior Create (redelivery, cross-partition reordering)
///   → a record is synthesized from `data` instead of failing
/// - Delete of a missing record → no-op
#[derive(Debug)]
pub struct PaymentProjection<S>
where
    S: ReadModelStore<PaymentId, PaymentReadModel>,
{
    store: S,
}

impl<S> PaymentProjection<S>
where
    S: ReadModelStore<PaymentId, PaymentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Apply a raw broker payload (JSON-encoded CDC envelope).
    pub fn apply_payload(&self, payload: &JsonValue) -> Result<(), PaymentProjectionError> {
        let event: CdcEvent<PaymentCdcData> = serde_json::from_value(payload.clone())
            .map_err(|e| PaymentProjectionError::Deserialize(e.to_string()))?;
        self.apply_change(&event)
    }

    /// Apply a decoded CDC envelope.
    pub fn apply_change(
        &self,
        event: &CdcEvent<PaymentCdcData>,
    ) -> Result<(), PaymentProjectionError> {
        debug!(
            event_id = %event.event_id,
            entity_id = %event.entity_id,
            operation = %event.operation,
            version = event.version,
            "applying CDC event to payment read model"
        );

        match event.operation {
            CdcOperation::Create => self.handle_create(event),
            CdcOperation::Update => self.handle_update(event),
            CdcOperation::Delete => self.handle_delete(event),
            CdcOperation::Unknown => {
                // Never fatal: log and skip so the delivery gets acked.
                warn!(
                    event_id = %event.event_id,
                    entity_id = %event.entity_id,
                    "unknown CDC operation, skipping"
                );
                Ok(())
            }
        }
    }

    fn handle_create(&self, event: &CdcEvent<PaymentCdcData>) -> Result<(), PaymentProjectionError> {
        let data = Self::require_data(event)?;
        let record = PaymentReadModel::from_cdc_data(data);
        self.store.upsert(record.payment_id, record);
        info!(entity_id = %event.entity_id, "payment read model created");
        Ok(())
    }

    fn handle_update(&self, event: &CdcEvent<PaymentCdcData>) -> Result<(), PaymentProjectionError> {
        let data = Self::require_data(event)?;

        match self.store.get(&data.payment_id) {
            Some(mut record) => {
                record.merge_update(data);
                self.store.upsert(data.payment_id, record);
                info!(entity_id = %event.entity_id, "payment read model updated");
            }
            None => {
                // Update delivered before its Create: synthesize rather than
                // fail, favoring read-side availability over strict ordering.
                warn!(
                    entity_id = %event.entity_id,
                    "read model missing on update, synthesizing from CDC data"
                );
                let record = PaymentReadModel::from_cdc_data(data);
                self.store.upsert(record.payment_id, record);
            }
        }
        Ok(())
    }

    fn handle_delete(&self, event: &CdcEvent<PaymentCdcData>) -> Result<(), PaymentProjectionError> {
        let payment_id: PaymentId = event
            .entity_id
            .parse::<wirepay_core::AggregateId>()
            .map(PaymentId::new)
            .map_err(|_| PaymentProjectionError::InvalidEntityId(event.entity_id.clone()))?;

        // Absent is not an error (idempotent).
        self.store.remove(&payment_id);
        info!(entity_id = %event.entity_id, "payment read model removed");
        Ok(())
    }

    fn require_data(
        event: &CdcEvent<PaymentCdcData>,
    ) -> Result<&PaymentCdcData, PaymentProjectionError> {
        event.data.as_ref().ok_or_else(|| PaymentProjectionError::MissingData {
            operation: event.operation,
            entity_id: event.entity_id.clone(),
        })
    }

    // ----- query boundary (read-only) -----

    /// Look up one payment by id.
    pub fn get(&self, payment_id: &PaymentId) -> Option<PaymentReadModel> {
        self.store.get(payment_id)
    }

    /// All payment records.
    pub fn list(&self) -> Vec<PaymentReadModel> {
        self.store.list()
    }

    /// Records matching a predicate.
    pub fn find(&self, predicate: impl Fn(&PaymentReadModel) -> bool) -> Vec<PaymentReadModel> {
        self.store.list().into_iter().filter(|r| predicate(r)).collect()
    }

    /// Count of records matching a predicate (all records when `None`).
    pub fn count(&self, predicate: Option<&dyn Fn(&PaymentReadModel) -> bool>) -> usize {
        match predicate {
            None => self.store.count(),
            Some(p) => self.store.list().iter().filter(|r| p(r)).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::PAYMENT_ENTITY_TYPE;
    use crate::read_model::InMemoryReadModelStore;
    use std::sync::Arc;
    use wirepay_core::AggregateId;

    fn projection() -> PaymentProjection<Arc<InMemoryReadModelStore<PaymentId, PaymentReadModel>>> {
        PaymentProjection::new(Arc::new(InMemoryReadModelStore::new()))
    }

    fn cdc_data(payment_id: PaymentId, status: PaymentStatus) -> PaymentCdcData {
        PaymentCdcData {
            payment_id,
            user_id: UserId::new(),
            user_account_id: UserAccountId::new(),
            source_currency: Currency::Usd,
            source_amount: 10_000,
            target_currency: Currency::Eur,
            target_amount: 8_500,
            exchange_rate_bps: 8_500,
            status,
            create_date: Utc::now(),
            is_removed: false,
            is_email_notification_sent: false,
            version: 1,
            captured_at: Utc::now(),
        }
    }

    fn create_event(payment_id: PaymentId) -> CdcEvent<PaymentCdcData> {
        CdcEvent::create(
            PAYMENT_ENTITY_TYPE,
            payment_id.to_string(),
            cdc_data(payment_id, PaymentStatus::ToPay),
            1,
        )
    }

    #[test]
    fn create_builds_a_record_with_derived_fields() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());

        projection.apply_change(&create_event(id)).unwrap();

        let record = projection.get(&id).unwrap();
        assert_eq!(record.status, PaymentStatus::ToPay);
        assert_eq!(
            record.status_description,
            "Payment created and waiting to be processed"
        );
        assert_eq!(record.target_amount, 8_500);
    }

    #[test]
    fn duplicate_create_is_idempotent() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());
        let event = create_event(id);

        projection.apply_change(&event).unwrap();
        let after_first = projection.get(&id).unwrap();

        projection.apply_change(&event).unwrap();
        let after_second = projection.get(&id).unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(projection.count(None), 1);
    }

    #[test]
    fn update_merges_and_stamps_last_modified() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());
        projection.apply_change(&create_event(id)).unwrap();

        let mut updated = cdc_data(id, PaymentStatus::Processing);
        updated.is_email_notification_sent = true;
        let event = CdcEvent::update(PAYMENT_ENTITY_TYPE, id.to_string(), updated, None, 2);
        projection.apply_change(&event).unwrap();

        let record = projection.get(&id).unwrap();
        assert_eq!(record.status, PaymentStatus::Processing);
        assert_eq!(record.status_description, "Payment is being processed");
        assert!(record.is_email_notification_sent);
        assert!(record.last_modified_date.is_some());
    }

    #[test]
    fn update_without_prior_create_synthesizes_a_record() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());

        let event = CdcEvent::update(
            PAYMENT_ENTITY_TYPE,
            id.to_string(),
            cdc_data(id, PaymentStatus::Completed),
            None,
            3,
        );
        projection.apply_change(&event).unwrap();

        let record = projection.get(&id).unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
    }

    #[test]
    fn delete_removes_and_tolerates_absence() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());

        // Delete of a record that never existed is a no-op.
        let event: CdcEvent<PaymentCdcData> =
            CdcEvent::delete(PAYMENT_ENTITY_TYPE, id.to_string(), 1);
        projection.apply_change(&event).unwrap();

        projection.apply_change(&create_event(id)).unwrap();
        projection.apply_change(&event).unwrap();
        assert!(projection.get(&id).is_none());
    }

    #[test]
    fn unknown_operation_is_skipped_not_fatal() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());

        let mut event = create_event(id);
        event.operation = CdcOperation::Unknown;
        projection.apply_change(&event).unwrap();
        assert!(projection.get(&id).is_none());
    }

    #[test]
    fn create_without_data_is_a_projection_error() {
        let projection = projection();
        let id = PaymentId::new(AggregateId::new());

        let mut event = create_event(id);
        event.data = None;
        let err = projection.apply_change(&event).unwrap_err();
        assert!(matches!(err, PaymentProjectionError::MissingData { .. }));
    }

    #[test]
    fn queries_filter_and_count() {
        let projection = projection();
        for _ in 0..3 {
            projection
                .apply_change(&create_event(PaymentId::new(AggregateId::new())))
                .unwrap();
        }

        assert_eq!(projection.list().len(), 3);
        assert_eq!(projection.find(|r| r.status == PaymentStatus::ToPay).len(), 3);
        let completed = |r: &PaymentReadModel| r.status == PaymentStatus::Completed;
        assert_eq!(projection.count(Some(&completed)), 0);
    }
}
