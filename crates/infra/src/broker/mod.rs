//! Infrastructure broker backends.
//!
//! The broker abstraction lives in `wirepay-events` as pure mechanics; this
//! module provides durable implementations (e.g. Redis Streams).

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsBroker, RedisStreamsConfig};
