//! Read-model projections built from CDC envelopes.
//!
//! Read models are **disposable**; the write side's event streams are the
//! source of truth. Projections must stay idempotent so at-least-once
//! delivery and replays are safe.

pub mod payments;

pub use payments::{PaymentProjection, PaymentProjectionError, PaymentReadModel};
