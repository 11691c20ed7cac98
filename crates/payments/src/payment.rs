use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wirepay_core::money::find_rate;
use wirepay_core::{
    AggregateId, AggregateRoot, ConversionRate, Currency, DomainError, DomainResult, EventSourced,
    MoneyValue, UserAccountId, UserId,
};
use wirepay_events::Event;

/// Payment identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub AggregateId);

impl PaymentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Payment lifecycle status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    ToPay,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    /// Human-readable description, denormalized into the read model.
    pub fn description(&self) -> &'static str {
        match self {
            PaymentStatus::ToPay => "Payment created and waiting to be processed",
            PaymentStatus::Processing => "Payment is being processed",
            PaymentStatus::Completed => "Payment completed successfully",
            PaymentStatus::Failed => "Payment failed",
            PaymentStatus::Cancelled => "Payment was cancelled",
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            PaymentStatus::ToPay => "ToPay",
            PaymentStatus::Processing => "Processing",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Event: a payment was placed with a converted target amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlaced {
    pub payment_id: PaymentId,
    pub user_id: UserId,
    pub user_account_id: UserAccountId,
    pub source_value: MoneyValue,
    pub target_value: MoneyValue,
    pub exchange_rate_bps: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the payment moved to a new lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChanged {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the confirmation email for this payment went out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailNotificationSent {
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the payment was soft-removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRemoved {
    pub payment_id: PaymentId,
    pub occurred_at: DateTime<Utc>,
}

/// Closed set of payment events (exhaustive `match` in `apply`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentEvent {
    Placed(PaymentPlaced),
    StatusChanged(PaymentStatusChanged),
    EmailNotificationSent(EmailNotificationSent),
    Removed(PaymentRemoved),
}

impl PaymentEvent {
    pub fn payment_id(&self) -> PaymentId {
        match self {
            PaymentEvent::Placed(e) => e.payment_id,
            PaymentEvent::StatusChanged(e) => e.payment_id,
            PaymentEvent::EmailNotificationSent(e) => e.payment_id,
            PaymentEvent::Removed(e) => e.payment_id,
        }
    }
}

impl Event for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::Placed(_) => "payment.placed",
            PaymentEvent::StatusChanged(_) => "payment.status_changed",
            PaymentEvent::EmailNotificationSent(_) => "payment.email_notification_sent",
            PaymentEvent::Removed(_) => "payment.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::Placed(e) => e.occurred_at,
            PaymentEvent::StatusChanged(e) => e.occurred_at,
            PaymentEvent::EmailNotificationSent(e) => e.occurred_at,
            PaymentEvent::Removed(e) => e.occurred_at,
        }
    }
}

/// Aggregate root: Payment.
///
/// `version` counts only committed events; events produced by domain
/// operations sit in the uncommitted buffer until the event store accepts
/// them and the write repository calls `mark_committed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    id: PaymentId,
    user_id: Option<UserId>,
    user_account_id: Option<UserAccountId>,
    source_value: Option<MoneyValue>,
    target_value: Option<MoneyValue>,
    exchange_rate_bps: u32,
    status: PaymentStatus,
    created_at: Option<DateTime<Utc>>,
    placed: bool,
    is_removed: bool,
    is_email_notification_sent: bool,

    version: u64,
    uncommitted: Vec<PaymentEvent>,
}

impl Payment {
    fn empty(id: PaymentId) -> Self {
        Self {
            id,
            user_id: None,
            user_account_id: None,
            source_value: None,
            target_value: None,
            exchange_rate_bps: 0,
            status: PaymentStatus::ToPay,
            created_at: None,
            placed: false,
            is_removed: false,
            is_email_notification_sent: false,
            version: 0,
            uncommitted: Vec::new(),
        }
    }

    /// Place a new payment, converting the source value into the target
    /// currency through the given rate table.
    pub fn place(
        payment_id: PaymentId,
        user_id: UserId,
        user_account_id: UserAccountId,
        source_value: MoneyValue,
        target_currency: Currency,
        rates: &[ConversionRate],
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<Payment> {
        if source_value.amount() <= 0 {
            return Err(DomainError::validation("source amount must be positive"));
        }

        let (target_value, exchange_rate_bps) = if target_currency == source_value.currency() {
            (source_value, 10_000)
        } else {
            let rate = find_rate(rates, source_value.currency(), target_currency)?;
            (rate.convert(&source_value)?, rate.factor_bps)
        };

        let mut payment = Payment::empty(payment_id);
        payment.record(PaymentEvent::Placed(PaymentPlaced {
            payment_id,
            user_id,
            user_account_id,
            source_value,
            target_value,
            exchange_rate_bps,
            occurred_at,
        }));
        Ok(payment)
    }

    /// Reconstruct a payment by replaying its committed event stream.
    pub fn from_history(id: PaymentId, history: &[PaymentEvent]) -> DomainResult<Payment> {
        let mut payment = Payment::empty(id);
        for event in history {
            payment.apply_event(event);
            payment.version += 1;
        }
        if !payment.placed {
            return Err(DomainError::invariant(
                "payment stream does not start with a placement",
            ));
        }
        Ok(payment)
    }

    pub fn payment_id(&self) -> PaymentId {
        self.id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn user_account_id(&self) -> Option<UserAccountId> {
        self.user_account_id
    }

    pub fn source_value(&self) -> Option<MoneyValue> {
        self.source_value
    }

    pub fn target_value(&self) -> Option<MoneyValue> {
        self.target_value
    }

    pub fn exchange_rate_bps(&self) -> u32 {
        self.exchange_rate_bps
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_removed(&self) -> bool {
        self.is_removed
    }

    pub fn is_email_notification_sent(&self) -> bool {
        self.is_email_notification_sent
    }

    /// Move the payment into `Processing`.
    pub fn start_processing(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(PaymentStatus::ToPay, PaymentStatus::Processing, occurred_at)
    }

    /// Finish processing successfully.
    pub fn complete(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(PaymentStatus::Processing, PaymentStatus::Completed, occurred_at)
    }

    /// Finish processing with a failure.
    pub fn fail(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(PaymentStatus::Processing, PaymentStatus::Failed, occurred_at)
    }

    /// Cancel a payment that has not started processing.
    pub fn cancel(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.transition(PaymentStatus::ToPay, PaymentStatus::Cancelled, occurred_at)
    }

    /// Record that the confirmation email went out. Idempotent.
    pub fn mark_email_notification_sent(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        if self.is_email_notification_sent {
            return Ok(());
        }
        self.record(PaymentEvent::EmailNotificationSent(EmailNotificationSent {
            payment_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    /// Soft-remove the payment.
    pub fn remove(&mut self, occurred_at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_active()?;
        self.record(PaymentEvent::Removed(PaymentRemoved {
            payment_id: self.id,
            occurred_at,
        }));
        Ok(())
    }

    fn transition(
        &mut self,
        from: PaymentStatus,
        to: PaymentStatus,
        occurred_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_active()?;
        if self.status != from {
            return Err(DomainError::invariant(format!(
                "cannot move payment from {} to {to}",
                self.status
            )));
        }
        self.record(PaymentEvent::StatusChanged(PaymentStatusChanged {
            payment_id: self.id,
            status: to,
            occurred_at,
        }));
        Ok(())
    }

    fn ensure_active(&self) -> DomainResult<()> {
        if !self.placed {
            return Err(DomainError::not_found());
        }
        if self.is_removed {
            return Err(DomainError::invariant("payment has been removed"));
        }
        Ok(())
    }

    /// Apply an event and park it in the uncommitted buffer.
    fn record(&mut self, event: PaymentEvent) {
        self.apply_event(&event);
        self.uncommitted.push(event);
    }

    fn apply_event(&mut self, event: &PaymentEvent) {
        match event {
            PaymentEvent::Placed(e) => {
                self.id = e.payment_id;
                self.user_id = Some(e.user_id);
                self.user_account_id = Some(e.user_account_id);
                self.source_value = Some(e.source_value);
                self.target_value = Some(e.target_value);
                self.exchange_rate_bps = e.exchange_rate_bps;
                self.status = PaymentStatus::ToPay;
                self.created_at = Some(e.occurred_at);
                self.placed = true;
            }
            PaymentEvent::StatusChanged(e) => {
                self.status = e.status;
            }
            PaymentEvent::EmailNotificationSent(_) => {
                self.is_email_notification_sent = true;
            }
            PaymentEvent::Removed(_) => {
                self.is_removed = true;
            }
        }
    }
}

impl AggregateRoot for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl EventSourced for Payment {
    type Event = PaymentEvent;

    fn apply(&mut self, event: &Self::Event) {
        self.apply_event(event);
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted
    }

    fn mark_committed(&mut self, new_version: u64) {
        self.version = new_version;
        self.uncommitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> Vec<ConversionRate> {
        vec![
            ConversionRate::new(Currency::Usd, Currency::Eur, 8_500),
            ConversionRate::new(Currency::Eur, Currency::Usd, 11_100),
        ]
    }

    fn place_test_payment() -> Payment {
        Payment::place(
            PaymentId::new(AggregateId::new()),
            UserId::new(),
            UserAccountId::new(),
            MoneyValue::of(10_000, Currency::Usd),
            Currency::Eur,
            &rates(),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn place_converts_into_target_currency() {
        let payment = place_test_payment();

        assert_eq!(payment.status(), PaymentStatus::ToPay);
        assert_eq!(
            payment.target_value(),
            Some(MoneyValue::of(8_500, Currency::Eur))
        );
        assert_eq!(payment.exchange_rate_bps(), 8_500);
        assert_eq!(payment.uncommitted_events().len(), 1);
        assert_eq!(payment.version(), 0);
    }

    #[test]
    fn place_same_currency_skips_conversion() {
        let payment = Payment::place(
            PaymentId::new(AggregateId::new()),
            UserId::new(),
            UserAccountId::new(),
            MoneyValue::of(500, Currency::Usd),
            Currency::Usd,
            &[],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(payment.target_value(), Some(MoneyValue::of(500, Currency::Usd)));
        assert_eq!(payment.exchange_rate_bps(), 10_000);
    }

    #[test]
    fn place_without_rate_is_a_validation_error() {
        let result = Payment::place(
            PaymentId::new(AggregateId::new()),
            UserId::new(),
            UserAccountId::new(),
            MoneyValue::of(500, Currency::Gbp),
            Currency::Eur,
            &rates(),
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn place_rejects_non_positive_amounts() {
        let result = Payment::place(
            PaymentId::new(AggregateId::new()),
            UserId::new(),
            UserAccountId::new(),
            MoneyValue::of(0, Currency::Usd),
            Currency::Usd,
            &[],
            Utc::now(),
        );
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn status_machine_happy_path() {
        let mut payment = place_test_payment();
        payment.start_processing(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Processing);
        payment.complete(Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Completed);
    }

    #[test]
    fn cannot_complete_before_processing() {
        let mut payment = place_test_payment();
        assert!(matches!(
            payment.complete(Utc::now()),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn cancel_only_before_processing() {
        let mut payment = place_test_payment();
        payment.start_processing(Utc::now()).unwrap();
        assert!(payment.cancel(Utc::now()).is_err());
    }

    #[test]
    fn removed_payment_rejects_further_operations() {
        let mut payment = place_test_payment();
        payment.remove(Utc::now()).unwrap();
        assert!(payment.is_removed());
        assert!(matches!(
            payment.start_processing(Utc::now()),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(payment.remove(Utc::now()).is_err());
    }

    #[test]
    fn email_notification_is_idempotent() {
        let mut payment = place_test_payment();
        payment.mark_email_notification_sent(Utc::now()).unwrap();
        payment.mark_email_notification_sent(Utc::now()).unwrap();

        let email_events = payment
            .uncommitted_events()
            .iter()
            .filter(|e| matches!(e, PaymentEvent::EmailNotificationSent(_)))
            .count();
        assert_eq!(email_events, 1);
    }

    #[test]
    fn mark_committed_clears_buffer_and_adopts_version() {
        let mut payment = place_test_payment();
        payment.start_processing(Utc::now()).unwrap();
        assert_eq!(payment.uncommitted_events().len(), 2);

        payment.mark_committed(2);
        assert!(payment.uncommitted_events().is_empty());
        assert_eq!(payment.version(), 2);
    }

    #[test]
    fn replay_reproduces_state_and_counts_version() {
        let mut payment = place_test_payment();
        payment.start_processing(Utc::now()).unwrap();
        payment.complete(Utc::now()).unwrap();
        payment.mark_email_notification_sent(Utc::now()).unwrap();

        let history: Vec<PaymentEvent> = payment.uncommitted_events().to_vec();
        payment.mark_committed(history.len() as u64);

        let replayed = Payment::from_history(payment.payment_id(), &history).unwrap();
        assert_eq!(replayed, payment);
        assert_eq!(replayed.version(), history.len() as u64);
    }

    #[test]
    fn replay_of_headless_stream_is_rejected() {
        let id = PaymentId::new(AggregateId::new());
        let history = [PaymentEvent::StatusChanged(PaymentStatusChanged {
            payment_id: id,
            status: PaymentStatus::Processing,
            occurred_at: Utc::now(),
        })];
        assert!(Payment::from_history(id, &history).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_ops() -> impl Strategy<Value = Vec<u8>> {
            proptest::collection::vec(0u8..4, 0..6)
        }

        proptest! {
            /// Property: replaying the produced events reproduces the exact
            /// state that produced them, whatever the operation sequence.
            #[test]
            fn replay_round_trips(amount in 1i64..1_000_000, ops in arb_ops()) {
                let mut payment = Payment::place(
                    PaymentId::new(AggregateId::new()),
                    UserId::new(),
                    UserAccountId::new(),
                    MoneyValue::of(amount, Currency::Usd),
                    Currency::Eur,
                    &[ConversionRate::new(Currency::Usd, Currency::Eur, 8_500)],
                    Utc::now(),
                ).unwrap();

                for op in ops {
                    // Invalid transitions are rejected without mutating state,
                    // so we just ignore their errors.
                    let _ = match op {
                        0 => payment.start_processing(Utc::now()),
                        1 => payment.complete(Utc::now()),
                        2 => payment.mark_email_notification_sent(Utc::now()),
                        _ => payment.remove(Utc::now()),
                    };
                }

                let history: Vec<PaymentEvent> = payment.uncommitted_events().to_vec();
                payment.mark_committed(history.len() as u64);

                let replayed = Payment::from_history(payment.payment_id(), &history).unwrap();
                prop_assert_eq!(replayed, payment);
            }
        }
    }
}
