//! Ordered message log with consumer groups.
//!
//! Probe jobs travel from the scheduler to the workers through an
//! append-only stream. The [`StreamBroker`] trait abstracts the broker the
//! same way [`crate::store::Repository`] abstracts the database: Redis
//! Streams in production, an in-memory log in tests.
//!
//! Delivery contract: a message read through a group stays *pending* for
//! that group until acknowledged, so a worker that dies mid-job leaves the
//! job eligible for redelivery instead of losing it.

pub mod error;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub use error::{BrokerError, BrokerResult};
pub use memory::MemoryBroker;
pub use self::redis::RedisStreamBroker;

/// Stream carrying probe jobs.
pub const HEALTH_CHECK_STREAM: &str = "health_checks";

/// Consumer group shared by all workers.
pub const HEALTH_CHECK_GROUP: &str = "health_checkers";

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Only messages appended after the group exists. This is what the
    /// worker group uses: historical jobs are already persisted as outcomes,
    /// and replaying them on startup would probe long-stale URLs.
    Tail,
    /// Every message in the stream.
    Beginning,
}

/// A field value as it came off the wire. Brokers differ in how they hand
/// values back (Redis returns byte strings, an in-memory broker keeps what
/// was appended), so consumers parse rather than assume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// The value as UTF-8 text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::Bytes(b) => std::str::from_utf8(b).ok(),
            FieldValue::Int(_) => None,
        }
    }
}

/// One delivered message.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Broker-assigned id, passed back on ack.
    pub id: String,
    pub fields: HashMap<String, FieldValue>,
}

/// Capability interface over the stream broker.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append a message; returns after the write is durable. Ordering within
    /// a stream is total.
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> BrokerResult<()>;

    /// Idempotently create a consumer group. "Already exists" is success.
    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> BrokerResult<()>;

    /// Long-poll up to `count` undelivered messages for `consumer`, blocking
    /// up to `block`. Timeout yields an empty vec, not an error. Delivered
    /// messages become pending until acked.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamMessage>>;

    /// Mark a delivered message as done for the group.
    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BrokerResult<()>;
}
