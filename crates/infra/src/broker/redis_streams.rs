//! Redis Streams-backed message bus (durable, at-least-once delivery).
//!
//! Mapping of the broker contract onto Streams:
//!
//! - **Topic → stream**: each topic gets its own stream key
//!   (`wirepay:<topic>`), so per-topic consumers never scan foreign traffic.
//! - **Publish**: XADD with the partition key and JSON payload as fields.
//!   Redis Streams are single-partition per key, which trivially satisfies
//!   per-key ordering.
//! - **Subscribe**: a consumer group per subscription
//!   (XGROUP CREATE ... MKSTREAM, XREADGROUP). Unacknowledged entries are
//!   reclaimed with XPENDING/XCLAIM once they have been idle longer than the
//!   visibility timeout; XACK removes them from the pending list.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::warn;

use wirepay_events::broker::{AckToken, BrokerError, BrokerSubscription, Delivery, MessageBus};

const DEFAULT_STREAM_PREFIX: &str = "wirepay:";
const DEFAULT_GROUP: &str = "wirepay.projector";
const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);
const READ_COUNT: usize = 10;

/// Redis Streams broker configuration.
#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    /// Prefix for stream keys (`<prefix><topic>`).
    pub stream_prefix: String,
    /// Consumer group name used by subscriptions.
    pub group: String,
    /// Consumer name within the group (unique per process).
    pub consumer: String,
    /// Idle time after which an unacked entry is reclaimed.
    pub visibility_timeout: Duration,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: format!("consumer-{}", uuid::Uuid::now_v7()),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }
}

/// Message bus over Redis Streams.
#[derive(Clone)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    config: RedisStreamsConfig,
}

impl RedisStreamsBroker {
    /// Connect to Redis (e.g. `"redis://localhost:6379"`).
    pub fn new(redis_url: impl AsRef<str>, config: RedisStreamsConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}{}", self.config.stream_prefix, topic)
    }

    fn connection(&self) -> Result<redis::Connection, BrokerError> {
        self.client
            .get_connection()
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists (idempotent; the "already exists"
    /// error is ignored).
    fn ensure_group(&self, stream: &str) -> Result<(), BrokerError> {
        let mut conn = self.connection()?;
        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(&self.config.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);
        Ok(())
    }
}

impl MessageBus for RedisStreamsBroker {
    fn publish(&self, topic: &str, key: &str, payload: JsonValue) -> Result<(), BrokerError> {
        let body = serde_json::to_string(&payload)
            .map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let mut conn = self.connection()?;

        let _: String = redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("payload")
            .arg(&body)
            .query(&mut conn)
            .map_err(|e| BrokerError::Publish(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
        let stream = self.stream_key(topic);
        self.ensure_group(&stream)?;

        Ok(Box::new(RedisStreamsSubscription {
            broker: self.clone(),
            stream,
            buffer: VecDeque::new(),
        }))
    }
}

struct RedisStreamsSubscription {
    broker: RedisStreamsBroker,
    stream: String,
    buffer: VecDeque<Delivery>,
}

impl RedisStreamsSubscription {
    /// Reclaim entries this consumer left unacked longer than the visibility
    /// timeout.
    fn claim_expired(&mut self, conn: &mut redis::Connection) -> Result<(), BrokerError> {
        let pending: Vec<(String, String, u64, u64)> = match redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(&self.broker.config.group)
            .arg("-")
            .arg("+")
            .arg(READ_COUNT)
            .arg(&self.broker.config.consumer)
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(()), // No pending entries
        };

        let ids: Vec<String> = pending.into_iter().map(|(id, _, _, _)| id).collect();
        if ids.is_empty() {
            return Ok(());
        }

        let min_idle_ms = self.broker.config.visibility_timeout.as_millis() as u64;
        let claimed: Vec<redis::Value> = match redis::cmd("XCLAIM")
            .arg(&self.stream)
            .arg(&self.broker.config.group)
            .arg(&self.broker.config.consumer)
            .arg(min_idle_ms)
            .arg(&ids[..])
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };

        for entry in claimed {
            match parse_entry(&entry) {
                Ok(delivery) => self.buffer.push_back(delivery),
                Err(e) => warn!(stream = %self.stream, error = %e, "skipping unparsable entry"),
            }
        }
        Ok(())
    }

    /// Read new entries for this consumer group (blocking up to `block`).
    fn read_new(
        &mut self,
        conn: &mut redis::Connection,
        block: Duration,
    ) -> Result<(), BrokerError> {
        let result: redis::RedisResult<HashMap<String, Vec<redis::Value>>> =
            redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.broker.config.group)
                .arg(&self.broker.config.consumer)
                .arg("COUNT")
                .arg(READ_COUNT)
                .arg("BLOCK")
                .arg(block.as_millis() as u64)
                .arg("STREAMS")
                .arg(&self.stream)
                .arg(">")
                .query(conn);

        let streams = match result {
            Ok(data) => data,
            // Nil reply: blocking timeout with no new entries.
            Err(e) if e.kind() == redis::ErrorKind::TypeError => return Ok(()),
            Err(e) => return Err(BrokerError::Receive(format!("XREADGROUP failed: {e}"))),
        };

        for entry in streams.get(&self.stream).cloned().unwrap_or_default() {
            match parse_entry(&entry) {
                Ok(delivery) => self.buffer.push_back(delivery),
                Err(e) => warn!(stream = %self.stream, error = %e, "skipping unparsable entry"),
            }
        }
        Ok(())
    }
}

impl BrokerSubscription for RedisStreamsSubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        if let Some(delivery) = self.buffer.pop_front() {
            return Ok(Some(delivery));
        }

        let mut conn = self.broker.connection()?;
        self.claim_expired(&mut conn)?;
        if self.buffer.is_empty() {
            self.read_new(&mut conn, timeout)?;
        }
        Ok(self.buffer.pop_front())
    }

    fn ack(&mut self, token: &AckToken) -> Result<(), BrokerError> {
        let id = match token {
            AckToken::Receipt(id) => id,
            AckToken::PartitionOffset { .. } => {
                return Err(BrokerError::Ack(
                    "offset token does not belong to the Redis broker".to_string(),
                ));
            }
        };

        let mut conn = self.broker.connection()?;
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.broker.config.group)
            .arg(id)
            .query(&mut conn)
            .map_err(|e| BrokerError::Ack(format!("XACK failed: {e}")))?;
        Ok(())
    }
}

/// Parse a stream entry `[id, [field, value, ...]]` into a delivery.
fn parse_entry(entry: &redis::Value) -> Result<Delivery, BrokerError> {
    let parts = match entry {
        redis::Value::Bulk(parts) if parts.len() >= 2 => parts,
        _ => return Err(BrokerError::Receive("invalid entry format".to_string())),
    };

    let id = match &parts[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => return Err(BrokerError::Receive("invalid entry id".to_string())),
    };

    let field_values = match &parts[1] {
        redis::Value::Bulk(fields) => fields,
        _ => return Err(BrokerError::Receive("invalid entry fields".to_string())),
    };

    let mut fields = HashMap::new();
    for chunk in field_values.chunks(2) {
        if let [redis::Value::Data(name), redis::Value::Data(value)] = chunk {
            fields.insert(
                String::from_utf8_lossy(name).to_string(),
                String::from_utf8_lossy(value).to_string(),
            );
        }
    }

    let key = fields
        .get("key")
        .cloned()
        .ok_or_else(|| BrokerError::Receive("missing key field".to_string()))?;
    let payload_str = fields
        .get("payload")
        .ok_or_else(|| BrokerError::Receive("missing payload field".to_string()))?;
    let payload: JsonValue = serde_json::from_str(payload_str)
        .map_err(|e| BrokerError::Serialization(e.to_string()))?;

    Ok(Delivery {
        key,
        payload,
        token: AckToken::Receipt(id),
    })
}
