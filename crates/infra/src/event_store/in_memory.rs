use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use wirepay_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// Each stream sits behind its own mutex so the compare-and-swap version
/// check and the append are atomic **per aggregate**; appends to different
/// aggregates proceed in parallel. The outer registry lock is held only long
/// enough to look up (or create) a stream handle.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Arc<Mutex<Vec<StoredEvent>>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn existing_stream_handle(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<Arc<Mutex<Vec<StoredEvent>>>>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
        Ok(streams.get(&aggregate_id).cloned())
    }

    fn stream_handle_or_create(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Arc<Mutex<Vec<StoredEvent>>>, EventStoreError> {
        if let Some(handle) = self.existing_stream_handle(aggregate_id)? {
            return Ok(handle);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;
        Ok(streams
            .entry(aggregate_id)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone())
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same aggregate stream.
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let handle = self.stream_handle_or_create(aggregate_id)?;
        let mut stream = handle
            .lock()
            .map_err(|_| EventStoreError::InvalidAppend("stream lock poisoned".to_string()))?;

        let current = Self::current_version(&stream);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = self
            .existing_stream_handle(aggregate_id)?
            .ok_or(EventStoreError::AggregateNotFound(aggregate_id))?;

        let stream = handle
            .lock()
            .map_err(|_| EventStoreError::InvalidAppend("stream lock poisoned".to_string()))?;
        Ok(stream.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn uncommitted(aggregate_id: AggregateId, label: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: "payment".to_string(),
            event_type: "payment.test".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: json!({ "label": label }),
        }
    }

    #[test]
    fn append_assigns_sequence_numbers_in_input_order() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let committed = store
            .append(
                vec![uncommitted(id, "a"), uncommitted(id, "b")],
                ExpectedVersion::NoStream,
            )
            .unwrap();

        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[1].sequence_number, 2);

        let loaded = store.load_stream(id).unwrap();
        assert_eq!(loaded, committed);
    }

    #[test]
    fn append_then_append_with_correct_expected_versions() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![uncommitted(id, "a")], ExpectedVersion::NoStream)
            .unwrap();
        store
            .append(vec![uncommitted(id, "b")], ExpectedVersion::Exact(1))
            .unwrap();

        let loaded = store.load_stream(id).unwrap();
        let labels: Vec<&str> = loaded
            .iter()
            .map(|e| e.payload["label"].as_str().unwrap())
            .collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(loaded.last().unwrap().stream_version(), 2);
    }

    #[test]
    fn stale_expected_version_mutates_nothing() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        store
            .append(vec![uncommitted(id, "a")], ExpectedVersion::NoStream)
            .unwrap();

        let err = store
            .append(
                vec![uncommitted(id, "stale-1"), uncommitted(id, "stale-2")],
                ExpectedVersion::Exact(0),
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));

        // All-or-nothing: the stream still holds exactly one event.
        assert_eq!(store.load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn load_of_missing_stream_is_aggregate_not_found() {
        let store = InMemoryEventStore::new();
        let err = store.load_stream(AggregateId::new()).unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateNotFound(_)));
    }

    #[test]
    fn concurrent_appends_with_same_expected_version_admit_exactly_one() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        store
            .append(vec![uncommitted(id, "base")], ExpectedVersion::NoStream)
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..2 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.append(
                    vec![uncommitted(id, &format!("writer-{i}"))],
                    ExpectedVersion::Exact(1),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(EventStoreError::Concurrency(_))))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);
        assert_eq!(store.load_stream(id).unwrap().len(), 2);
    }

    #[test]
    fn streams_are_independent_per_aggregate() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();

        store
            .append(vec![uncommitted(a, "a1")], ExpectedVersion::NoStream)
            .unwrap();
        store
            .append(vec![uncommitted(b, "b1")], ExpectedVersion::NoStream)
            .unwrap();

        assert_eq!(store.load_stream(a).unwrap().len(), 1);
        assert_eq!(store.load_stream(b).unwrap().len(), 1);
    }

    #[test]
    fn mixed_aggregate_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(
                vec![
                    uncommitted(AggregateId::new(), "a"),
                    uncommitted(AggregateId::new(), "b"),
                ],
                ExpectedVersion::NoStream,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }
}
