//! `wirepay-events` — event mechanics shared by the write and read sides.
//!
//! Two delivery abstractions live here, deliberately kept apart:
//!
//! - [`EventBus`]: in-process pub/sub used for domain-event fan-out right
//!   after an event-store append (broadcast, no durability).
//! - [`MessageBus`]: the partitioned, key-ordered broker contract the outbox
//!   processor publishes to and CDC consumers subscribe from
//!   (at-least-once, explicit acknowledgement).

pub mod broker;
pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_broker;
pub mod in_memory_bus;

pub use broker::{AckToken, BrokerError, BrokerSubscription, Delivery, MessageBus};
pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_broker::InMemoryBroker;
pub use in_memory_bus::InMemoryEventBus;
