//! Change Data Capture: shaping write-side changes into versioned envelopes
//! for read-side consumption.
//!
//! The envelope is the wire contract; topics derive deterministically from
//! the entity type (`cdc.payment`). Publishers come in two flavors (direct
//! to the broker, or staged through the transactional outbox) behind one
//! [`CdcPublisher`] trait so the write repository does not care which sink
//! is assembled.

pub mod envelope;
pub mod payment_data;
pub mod publisher;

pub use envelope::{CdcEvent, CdcOperation, DEFAULT_SOURCE, topic_for};
pub use payment_data::{PAYMENT_ENTITY_TYPE, PaymentCdcData};
pub use publisher::{CdcPublishError, CdcPublisher, DirectCdcPublisher, OutboxCdcPublisher};
