//! CDC publishers: direct-to-broker and outbox-backed sinks.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use wirepay_events::{BrokerError, MessageBus};

use crate::outbox::{OutboxMessage, OutboxStore, OutboxStoreError};

use super::envelope::{CdcEvent, DEFAULT_SOURCE};

/// CDC publish error.
#[derive(Debug, Error)]
pub enum CdcPublishError {
    /// Broker rejected the publish (direct sink). The caller decides whether
    /// to retry or abort.
    #[error("broker publish failed: {0}")]
    Broker(#[from] BrokerError),

    /// Staging the envelope failed (outbox sink). Fatal to the triggering
    /// write: the change must not be considered committed if its
    /// notification cannot even be staged.
    #[error("outbox enqueue failed: {0}")]
    Outbox(#[from] OutboxStoreError),

    #[error("envelope serialization failed: {0}")]
    Serialization(String),
}

/// Shapes domain changes into CDC envelopes and hands them to a sink.
///
/// Two interchangeable sinks exist: [`DirectCdcPublisher`] (immediate, no
/// durability across process failure) and [`OutboxCdcPublisher`] (staged
/// durably, the recommended path).
pub trait CdcPublisher: Send + Sync {
    /// Publish a prepared envelope.
    fn publish<T: Serialize>(&self, event: CdcEvent<T>) -> Result<(), CdcPublishError>;

    fn publish_create<T: Serialize>(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: T,
        version: u64,
    ) -> Result<(), CdcPublishError> {
        self.publish(CdcEvent::create(entity_type, entity_id, data, version))
    }

    fn publish_update<T: Serialize>(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: T,
        old_data: Option<T>,
        version: u64,
    ) -> Result<(), CdcPublishError> {
        self.publish(CdcEvent::update(entity_type, entity_id, data, old_data, version))
    }

    fn publish_delete(
        &self,
        entity_type: &str,
        entity_id: &str,
        version: u64,
    ) -> Result<(), CdcPublishError> {
        self.publish(CdcEvent::<serde_json::Value>::delete(entity_type, entity_id, version))
    }
}

/// Publishes envelopes straight to the broker.
///
/// No durability: a crash after the triggering write but before the publish
/// loses the notification. Use the outbox sink where that matters.
pub struct DirectCdcPublisher<B> {
    bus: B,
    source: String,
}

impl<B> DirectCdcPublisher<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl<B> CdcPublisher for DirectCdcPublisher<B>
where
    B: MessageBus,
{
    fn publish<T: Serialize>(&self, event: CdcEvent<T>) -> Result<(), CdcPublishError> {
        let event = event.with_source(self.source.clone());
        let topic = event.topic();

        debug!(
            event_id = %event.event_id,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            operation = %event.operation,
            topic = %topic,
            "publishing CDC event"
        );

        let payload = serde_json::to_value(&event)
            .map_err(|e| CdcPublishError::Serialization(e.to_string()))?;

        match self.bus.publish(&topic, &event.entity_id, payload) {
            Ok(()) => {
                info!(
                    event_id = %event.event_id,
                    entity_id = %event.entity_id,
                    topic = %topic,
                    "CDC event published"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    event_id = %event.event_id,
                    entity_id = %event.entity_id,
                    topic = %topic,
                    error = %e,
                    "CDC publish failed"
                );
                Err(e.into())
            }
        }
    }
}

/// Stages envelopes in the outbox instead of publishing them.
///
/// The durable, recommended path: the outbox processor publishes staged
/// envelopes asynchronously with retry and dead-lettering.
pub struct OutboxCdcPublisher<S> {
    outbox: S,
    source: String,
}

impl<S> OutboxCdcPublisher<S> {
    pub fn new(outbox: S) -> Self {
        Self {
            outbox,
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

impl<S> CdcPublisher for OutboxCdcPublisher<S>
where
    S: OutboxStore,
{
    fn publish<T: Serialize>(&self, event: CdcEvent<T>) -> Result<(), CdcPublishError> {
        let event = event.with_source(self.source.clone());
        let topic = event.topic();
        let event_type = format!("{topic}.{}", event.operation.as_str());

        let payload = serde_json::to_value(&event)
            .map_err(|e| CdcPublishError::Serialization(e.to_string()))?;

        let message = OutboxMessage::new(
            event.entity_type.clone(),
            event.entity_id.clone(),
            event_type,
            topic,
            payload,
        );

        let outbox_id = self.outbox.enqueue(message)?;
        info!(
            event_id = %event.event_id,
            outbox_id = %outbox_id,
            entity_id = %event.entity_id,
            operation = %event.operation,
            "CDC event staged in outbox"
        );
        Ok(())
    }
}
