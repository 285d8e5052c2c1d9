//! In-memory stream broker.
//!
//! A Vec per stream plus a cursor and pending map per consumer group.
//! Blocking reads park on a [`Notify`] until an append lands or the block
//! window lapses. Redelivery of pending messages is explicit
//! ([`MemoryBroker::redeliver_pending`]) so tests can stand in for an
//! operator claiming stuck messages.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use super::error::{BrokerError, BrokerResult};
use super::{FieldValue, StartPosition, StreamBroker, StreamMessage};

#[derive(Default)]
struct Group {
    cursor: usize,
    pending: HashMap<String, StreamMessage>,
    redelivery: VecDeque<StreamMessage>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Vec<StreamMessage>>,
    groups: HashMap<(String, String), Group>,
}

#[derive(Default, Clone)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    appended: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message ever appended to a stream, in order. Test inspection.
    pub fn messages(&self, stream: &str) -> Vec<StreamMessage> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        inner.streams.get(stream).cloned().unwrap_or_default()
    }

    /// Delivered-but-unacked messages for a group. Test inspection.
    pub fn pending(&self, stream: &str, group: &str) -> Vec<StreamMessage> {
        let inner = self.inner.lock().expect("broker lock poisoned");
        let Some(group) = inner.groups.get(&(stream.to_string(), group.to_string())) else {
            return Vec::new();
        };
        let mut pending: Vec<StreamMessage> = group.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        pending
    }

    /// Queue every pending message for redelivery on the group's next read,
    /// the way a claim of idle messages would on a real broker. The entries
    /// stay pending until acked.
    pub fn redeliver_pending(&self, stream: &str, group: &str) {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        if let Some(group) = inner
            .groups
            .get_mut(&(stream.to_string(), group.to_string()))
        {
            let mut stuck: Vec<StreamMessage> = group.pending.values().cloned().collect();
            stuck.sort_by(|a, b| a.id.cmp(&b.id));
            group.redelivery.extend(stuck);
        }
        self.appended.notify_waiters();
    }

    fn take_ready(
        inner: &mut Inner,
        stream: &str,
        group_name: &str,
        count: usize,
    ) -> BrokerResult<Vec<StreamMessage>> {
        let key = (stream.to_string(), group_name.to_string());
        let entries = inner.streams.get(stream).cloned().unwrap_or_default();
        let Some(group) = inner.groups.get_mut(&key) else {
            return Err(BrokerError::CommandFailed(format!(
                "NOGROUP no such consumer group '{group_name}' for stream '{stream}'"
            )));
        };

        let mut ready = Vec::new();
        while ready.len() < count {
            if let Some(msg) = group.redelivery.pop_front() {
                ready.push(msg);
                continue;
            }
            if group.cursor >= entries.len() {
                break;
            }
            let msg = entries[group.cursor].clone();
            group.cursor += 1;
            ready.push(msg);
        }

        for msg in &ready {
            group.pending.insert(msg.id.clone(), msg.clone());
        }
        Ok(ready)
    }
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> BrokerResult<()> {
        {
            let mut inner = self.inner.lock().expect("broker lock poisoned");
            let entries = inner.streams.entry(stream.to_string()).or_default();
            let message = StreamMessage {
                id: format!("{}-0", entries.len() + 1),
                fields: fields
                    .iter()
                    .map(|(name, value)| (name.to_string(), FieldValue::Str(value.clone())))
                    .collect(),
            };
            entries.push(message);
        }
        self.appended.notify_waiters();
        Ok(())
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: StartPosition,
    ) -> BrokerResult<()> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        let tail = inner.streams.get(stream).map(Vec::len).unwrap_or(0);
        let key = (stream.to_string(), group.to_string());
        inner.groups.entry(key).or_insert_with(|| Group {
            cursor: match start {
                StartPosition::Tail => tail,
                StartPosition::Beginning => 0,
            },
            ..Group::default()
        });
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        count: usize,
        block: Duration,
    ) -> BrokerResult<Vec<StreamMessage>> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking so an append between the
            // check and the wait still wakes us.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().expect("broker lock poisoned");
                let ready = Self::take_ready(&mut inner, stream, group, count)?;
                if !ready.is_empty() {
                    return Ok(ready);
                }
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BrokerResult<()> {
        let mut inner = self.inner.lock().expect("broker lock poisoned");
        if let Some(group) = inner
            .groups
            .get_mut(&(stream.to_string(), group.to_string()))
        {
            group.pending.remove(message_id);
        }
        Ok(())
    }
}
