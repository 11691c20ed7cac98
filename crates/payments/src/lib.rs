//! Payments domain module (event-sourced).
//!
//! This crate contains business rules for payments, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod payment;

pub use payment::{
    EmailNotificationSent, Payment, PaymentEvent, PaymentId, PaymentPlaced, PaymentRemoved,
    PaymentStatus, PaymentStatusChanged,
};
