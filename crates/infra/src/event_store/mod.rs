//! Append-only event store boundary.
//!
//! This module defines an infrastructure-facing abstraction for storing and
//! loading per-aggregate event streams without making any storage
//! assumptions.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Adapter that publishes committed events to an in-process `EventBus` after
/// a successful append (domain-event fan-out, separate from CDC).
///
/// The bus is injected at construction and never swapped afterwards. Ordering
/// invariant: **publish happens only after append succeeds**, so subscribers
/// only ever see durable events.
pub struct PublishingEventStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingEventStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> EventStore for PublishingEventStore<S, B>
where
    S: EventStore,
    B: wirepay_events::EventBus<wirepay_events::EventEnvelope<serde_json::Value>>,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: wirepay_core::ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        // 1) Append (durable step)
        let committed = self.store.append(events, expected_version)?;

        // 2) Publish committed events (best-effort; at-least-once acceptable)
        for e in &committed {
            self.bus
                .publish(e.to_envelope())
                .map_err(|err| EventStoreError::Publish(format!("{err:?}")))?;
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        aggregate_id: wirepay_core::AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.store.load_stream(aggregate_id)
    }
}
