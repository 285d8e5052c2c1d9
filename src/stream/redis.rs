//! Redis Streams broker.
//!
//! Jobs ride a single stream (XADD); workers share a consumer group created
//! at the stream tail (XGROUP CREATE MKSTREAM `$`) and read with XREADGROUP
//! `>` COUNT/BLOCK. Acknowledgment is XACK. The connection manager
//! multiplexes and reconnects, so one client is shared by every task.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use tracing::{info, instrument};

use super::error::{BrokerError, BrokerResult};
use super::{FieldValue, StartPosition, StreamBroker, StreamMessage};

pub struct RedisStreamBroker {
    conn: ConnectionManager,
}

impl RedisStreamBroker {
    /// Connect and verify the broker answers a PING.
    #[instrument(skip_all)]
    pub async fn connect(redis_url: &str) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        let mut ping_conn = conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut ping_conn)
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        info!("connected to redis stream broker");
        Ok(Self { conn })
    }

    fn field_value(value: Value) -> FieldValue {
        match value {
            Value::Int(i) => FieldValue::Int(i),
            Value::BulkString(bytes) => match String::from_utf8(bytes) {
                Ok(s) => FieldValue::Str(s),
                Err(err) => FieldValue::Bytes(err.into_bytes()),
            },
            Value::SimpleString(s) => FieldValue::Str(s),
            other => FieldValue::Bytes(format!("{other:?}").into_bytes()),
        }
    }
}

#[async_trait]
impl StreamBroker for RedisStreamBroker {
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let _: String = conn.xadd(stream, "*", fields).await?;
        Ok(())
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> BrokerResult<()> {
        let start_id = match start {
            StartPosition::Tail => "$",
            StartPosition::Beginning => "0",
        };

        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(stream, group, start_id).await;

        match created {
            Ok(()) => Ok(()),
            // The group surviving a restart is the normal case.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamMessage>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let mut conn = self.conn.clone();
        // `>` asks for messages never delivered to this group; a block
        // timeout comes back as a nil reply.
        let reply: Option<StreamReadReply> =
            conn.xread_options(&[stream], &[">"], &options).await?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let fields: HashMap<String, FieldValue> = entry
                    .map
                    .into_iter()
                    .map(|(name, value)| (name, Self::field_value(value)))
                    .collect();
                messages.push(StreamMessage {
                    id: entry.id,
                    fields,
                });
            }
        }
        Ok(messages)
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BrokerResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(stream, group, &[message_id]).await?;
        Ok(())
    }
}
