//! CDC envelope: the wire contract between the write and read sides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default `source` stamped on envelopes.
pub const DEFAULT_SOURCE: &str = "wirepay-write";

/// Topic prefix for CDC streams.
const TOPIC_PREFIX: &str = "cdc.";

/// Deterministic topic routing: `"cdc." + lowercase(entity_type)`.
pub fn topic_for(entity_type: &str) -> String {
    format!("{TOPIC_PREFIX}{}", entity_type.to_lowercase())
}

/// The kind of change an envelope announces.
///
/// Consumers must tolerate values they do not recognize (`Unknown` after
/// deserialization): log and skip, never crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdcOperation {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

impl CdcOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdcOperation::Create => "create",
            CdcOperation::Update => "update",
            CdcOperation::Delete => "delete",
            CdcOperation::Unknown => "unknown",
        }
    }
}

impl core::fmt::Display for CdcOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned change notification for one entity.
///
/// Produced once per publish attempt; retries may produce the envelope more
/// than once, so consumers must be idempotent. `data` is the entity state
/// after the change (null for Delete); `old_data` is optionally carried on
/// Update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct CdcEvent<T> {
    pub event_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub operation: CdcOperation,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_data: Option<T>,
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl<T> CdcEvent<T> {
    fn envelope(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: CdcOperation,
        data: Option<T>,
        old_data: Option<T>,
        version: u64,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            data,
            old_data,
            version,
            timestamp: Utc::now(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn create(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: T,
        version: u64,
    ) -> Self {
        Self::envelope(entity_type, entity_id, CdcOperation::Create, Some(data), None, version)
    }

    pub fn update(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data: T,
        old_data: Option<T>,
        version: u64,
    ) -> Self {
        Self::envelope(entity_type, entity_id, CdcOperation::Update, Some(data), old_data, version)
    }

    pub fn delete(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        version: u64,
    ) -> Self {
        Self::envelope(entity_type, entity_id, CdcOperation::Delete, None, None, version)
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Topic this envelope routes to.
    pub fn topic(&self) -> String {
        topic_for(&self.entity_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_routing_lowercases_the_entity_type() {
        assert_eq!(topic_for("Payment"), "cdc.payment");
        assert_eq!(topic_for("payment"), "cdc.payment");
    }

    #[test]
    fn create_envelope_carries_data_and_operation() {
        let event = CdcEvent::create("payment", "p-1", json!({ "status": "ToPay" }), 1);
        assert_eq!(event.operation, CdcOperation::Create);
        assert_eq!(event.topic(), "cdc.payment");
        assert!(event.data.is_some());
        assert!(event.old_data.is_none());
        assert_eq!(event.source, DEFAULT_SOURCE);
    }

    #[test]
    fn delete_envelope_serializes_data_as_null() {
        let event: CdcEvent<serde_json::Value> = CdcEvent::delete("payment", "p-1", 3);
        let wire = serde_json::to_value(&event).unwrap();
        assert!(wire["data"].is_null());
        assert!(wire.get("old_data").is_none());
        assert_eq!(wire["operation"], "delete");
    }

    #[test]
    fn unrecognized_operation_deserializes_to_unknown() {
        let wire = json!({
            "event_id": Uuid::now_v7(),
            "entity_type": "payment",
            "entity_id": "p-1",
            "operation": "truncate",
            "data": null,
            "version": 1,
            "timestamp": Utc::now(),
            "source": "elsewhere",
        });
        let event: CdcEvent<serde_json::Value> = serde_json::from_value(wire).unwrap();
        assert_eq!(event.operation, CdcOperation::Unknown);
    }

    #[test]
    fn envelope_round_trips_through_json() {
        let event = CdcEvent::update("payment", "p-1", json!({ "a": 1 }), Some(json!({ "a": 0 })), 2);
        let wire = serde_json::to_value(&event).unwrap();
        let back: CdcEvent<serde_json::Value> = serde_json::from_value(wire).unwrap();
        assert_eq!(back, event);
    }
}
