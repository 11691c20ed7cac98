//! Change-data shape for the payment entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wirepay_core::{Currency, UserAccountId, UserId};
use wirepay_payments::{Payment, PaymentId, PaymentStatus};

/// Entity type for payment CDC envelopes (topic `cdc.payment`).
pub const PAYMENT_ENTITY_TYPE: &str = "payment";

/// Flattened snapshot of a payment as carried in CDC envelopes.
///
/// This is the write side's view of the entity at capture time; the read
/// side builds its records from it without ever touching the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCdcData {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub user_account_id: UserAccountId,
    pub source_currency: Currency,
    pub source_amount: i64,
    pub target_currency: Currency,
    pub target_amount: i64,
    pub exchange_rate_bps: u32,
    pub status: PaymentStatus,
    pub create_date: DateTime<Utc>,
    pub is_removed: bool,
    pub is_email_notification_sent: bool,

    // Capture metadata
    pub version: u64,
    pub captured_at: DateTime<Utc>,
}

impl PaymentCdcData {
    /// Snapshot a placed payment at `version`.
    ///
    /// Returns `None` for a payment that was never placed (nothing to
    /// capture).
    pub fn from_payment(payment: &Payment, version: u64) -> Option<Self> {
        let source_value = payment.source_value()?;
        let target_value = payment.target_value()?;
        Some(Self {
            payment_id: payment.payment_id(),
            user_id: payment.user_id()?,
            user_account_id: payment.user_account_id()?,
            source_currency: source_value.currency(),
            source_amount: source_value.amount(),
            target_currency: target_value.currency(),
            target_amount: target_value.amount(),
            exchange_rate_bps: payment.exchange_rate_bps(),
            status: payment.status(),
            create_date: payment.created_at()?,
            is_removed: payment.is_removed(),
            is_email_notification_sent: payment.is_email_notification_sent(),
            version,
            captured_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wirepay_core::{AggregateId, ConversionRate, MoneyValue};

    #[test]
    fn snapshot_reflects_aggregate_state() {
        let payment = Payment::place(
            PaymentId::new(AggregateId::new()),
            UserId::new(),
            UserAccountId::new(),
            MoneyValue::of(10_000, Currency::Usd),
            Currency::Eur,
            &[ConversionRate::new(Currency::Usd, Currency::Eur, 8_500)],
            Utc::now(),
        )
        .unwrap();

        let data = PaymentCdcData::from_payment(&payment, 1).unwrap();
        assert_eq!(data.payment_id, payment.payment_id());
        assert_eq!(data.source_amount, 10_000);
        assert_eq!(data.source_currency, Currency::Usd);
        assert_eq!(data.target_amount, 8_500);
        assert_eq!(data.target_currency, Currency::Eur);
        assert_eq!(data.status, PaymentStatus::ToPay);
        assert_eq!(data.version, 1);
        assert!(!data.is_removed);
    }
}
