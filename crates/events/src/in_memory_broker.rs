//! In-memory partitioned broker for tests/dev.
//!
//! Mimics the delivery semantics of a key-ordered message log:
//!
//! - a fixed number of partitions per topic, records routed by key hash
//! - per-subscription cursors (a new subscription re-reads from the start)
//! - in-flight tracking with visibility-timeout redelivery (at-least-once)
//!
//! Not optimized for performance; records are retained for the lifetime of
//! the broker.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use crate::broker::{AckToken, BrokerError, BrokerSubscription, Delivery, MessageBus};

const DEFAULT_PARTITIONS: usize = 4;
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Granularity of the poll wait loop.
const POLL_TICK: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: JsonValue,
}

#[derive(Debug)]
struct TopicLog {
    partitions: Vec<Mutex<Vec<Record>>>,
}

impl TopicLog {
    fn new(partition_count: usize) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }
}

/// In-memory partitioned message log.
#[derive(Debug)]
pub struct InMemoryBroker {
    topics: RwLock<HashMap<String, Arc<TopicLog>>>,
    partition_count: usize,
    visibility_timeout: Duration,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_PARTITIONS, DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// Configure partition count and visibility timeout (tests shrink both).
    pub fn with_config(partition_count: usize, visibility_timeout: Duration) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            partition_count: partition_count.max(1),
            visibility_timeout,
        }
    }

    fn topic(&self, name: &str) -> Result<Arc<TopicLog>, BrokerError> {
        {
            let topics = self
                .topics
                .read()
                .map_err(|_| BrokerError::Receive("topic registry poisoned".to_string()))?;
            if let Some(log) = topics.get(name) {
                return Ok(log.clone());
            }
        }

        let mut topics = self
            .topics
            .write()
            .map_err(|_| BrokerError::Receive("topic registry poisoned".to_string()))?;
        Ok(topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(self.partition_count)))
            .clone())
    }

    fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partition_count
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for InMemoryBroker {
    fn publish(&self, topic: &str, key: &str, payload: JsonValue) -> Result<(), BrokerError> {
        let log = self.topic(topic)?;
        let partition = self.partition_for(key);

        let mut records = log.partitions[partition]
            .lock()
            .map_err(|_| BrokerError::Publish("partition poisoned".to_string()))?;
        records.push(Record {
            key: key.to_string(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let log = self.topic(topic)?;
        let cursors = (0..log.partitions.len()).map(|_| PartitionCursor::new()).collect();

        Ok(Box::new(InMemorySubscription {
            log,
            cursors,
            visibility_timeout: self.visibility_timeout,
            next_partition: 0,
        }))
    }
}

#[derive(Debug)]
struct PartitionCursor {
    /// Offset of the next never-delivered record.
    next: u64,
    /// Delivered-but-unacked offsets and when they were last handed out.
    in_flight: HashMap<u64, Instant>,
}

impl PartitionCursor {
    fn new() -> Self {
        Self {
            next: 0,
            in_flight: HashMap::new(),
        }
    }
}

struct InMemorySubscription {
    log: Arc<TopicLog>,
    cursors: Vec<PartitionCursor>,
    visibility_timeout: Duration,
    next_partition: usize,
}

impl InMemorySubscription {
    /// Scan partitions round-robin for a redeliverable or fresh record.
    fn try_next(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let partition_count = self.log.partitions.len();

        for i in 0..partition_count {
            let partition = (self.next_partition + i) % partition_count;
            let records = self.log.partitions[partition]
                .lock()
                .map_err(|_| BrokerError::Receive("partition poisoned".to_string()))?;
            let cursor = &mut self.cursors[partition];

            // Expired in-flight deliveries come back first (lowest offset for
            // deterministic ordering).
            let expired = cursor
                .in_flight
                .iter()
                .filter(|(_, delivered)| delivered.elapsed() >= self.visibility_timeout)
                .map(|(offset, _)| *offset)
                .min();
            if let Some(offset) = expired {
                cursor.in_flight.insert(offset, Instant::now());
                let record = &records[offset as usize];
                self.next_partition = (partition + 1) % partition_count;
                return Ok(Some(Delivery {
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    token: AckToken::PartitionOffset { partition, offset },
                }));
            }

            if (cursor.next as usize) < records.len() {
                let offset = cursor.next;
                cursor.next += 1;
                cursor.in_flight.insert(offset, Instant::now());
                let record = &records[offset as usize];
                self.next_partition = (partition + 1) % partition_count;
                return Ok(Some(Delivery {
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                    token: AckToken::PartitionOffset { partition, offset },
                }));
            }
        }

        Ok(None)
    }
}

impl BrokerSubscription for InMemorySubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(delivery) = self.try_next()? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(POLL_TICK.min(deadline - now));
        }
    }

    fn ack(&mut self, token: &AckToken) -> Result<(), BrokerError> {
        match token {
            AckToken::PartitionOffset { partition, offset } => {
                let cursor = self
                    .cursors
                    .get_mut(*partition)
                    .ok_or_else(|| BrokerError::Ack(format!("unknown partition {partition}")))?;
                cursor.in_flight.remove(offset);
                Ok(())
            }
            AckToken::Receipt(_) => Err(BrokerError::Ack(
                "receipt token does not belong to the in-memory broker".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn short_visibility() -> InMemoryBroker {
        InMemoryBroker::with_config(4, Duration::from_millis(40))
    }

    fn drain_payloads_for_key(sub: &mut Box<dyn BrokerSubscription>, key: &str) -> Vec<JsonValue> {
        let mut seen = Vec::new();
        while let Some(delivery) = sub.poll(Duration::from_millis(10)).unwrap() {
            if delivery.key == key {
                seen.push(delivery.payload.clone());
            }
            sub.ack(&delivery.token).unwrap();
        }
        seen
    }

    #[test]
    fn same_key_is_delivered_in_publish_order() {
        let broker = InMemoryBroker::new();
        for i in 0..5 {
            broker.publish("cdc.payment", "p-1", json!({ "seq": i })).unwrap();
        }
        // Interleave records for other keys.
        broker.publish("cdc.payment", "p-2", json!({ "other": true })).unwrap();

        let mut sub = broker.subscribe("cdc.payment").unwrap();
        let seen = drain_payloads_for_key(&mut sub, "p-1");
        let seqs: Vec<i64> = seen.iter().map(|p| p["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn unacked_delivery_is_redelivered_after_visibility_timeout() {
        let broker = short_visibility();
        broker.publish("cdc.payment", "p-1", json!({ "n": 1 })).unwrap();

        let mut sub = broker.subscribe("cdc.payment").unwrap();
        let first = sub.poll(Duration::from_millis(10)).unwrap().unwrap();

        // Not acked: nothing new before the timeout ...
        assert!(sub.poll(Duration::from_millis(10)).unwrap().is_none());

        // ... but the same record comes back once the timeout expires.
        std::thread::sleep(Duration::from_millis(50));
        let again = sub.poll(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(again.token, first.token);
        assert_eq!(again.payload, first.payload);
    }

    #[test]
    fn acked_delivery_is_not_redelivered() {
        let broker = short_visibility();
        broker.publish("cdc.payment", "p-1", json!({ "n": 1 })).unwrap();

        let mut sub = broker.subscribe("cdc.payment").unwrap();
        let delivery = sub.poll(Duration::from_millis(10)).unwrap().unwrap();
        sub.ack(&delivery.token).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert!(sub.poll(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn new_subscription_rereads_from_the_beginning() {
        let broker = InMemoryBroker::new();
        broker.publish("cdc.payment", "p-1", json!({ "n": 1 })).unwrap();

        let mut first = broker.subscribe("cdc.payment").unwrap();
        let delivery = first.poll(Duration::from_millis(10)).unwrap().unwrap();
        first.ack(&delivery.token).unwrap();

        // A restarted consumer sees the full log again.
        let mut second = broker.subscribe("cdc.payment").unwrap();
        assert!(second.poll(Duration::from_millis(10)).unwrap().is_some());
    }

    #[test]
    fn topics_are_isolated() {
        let broker = InMemoryBroker::new();
        broker.publish("cdc.payment", "p-1", json!({})).unwrap();

        let mut other = broker.subscribe("cdc.useraccount").unwrap();
        assert!(other.poll(Duration::from_millis(10)).unwrap().is_none());
    }
}
