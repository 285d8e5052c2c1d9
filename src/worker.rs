//! Probe executor.
//!
//! Workers share one consumer group on the job stream. Each worker long-polls
//! for a job, performs a time-bounded GET against the target, persists the
//! outcome, and acknowledges the message only once the outcome is durable.
//! A crash between processing and ack leaves the job pending for redelivery,
//! and the resulting double-probe is accepted (both outcomes persist).
//!
//! A status-change event is published only after its outcome is persisted:
//! subscribers never hear about a transition the store has not witnessed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::events::{EventBus, MonitorEvent, StatusChangeEvent};
use crate::shutdown::Shutdown;
use crate::store::Repository;
use crate::stream::{
    FieldValue, HEALTH_CHECK_GROUP, HEALTH_CHECK_STREAM, StartPosition, StreamBroker,
};
use crate::{NewHealthCheck, ProbeStatus, ServiceId};

/// How long one read blocks waiting for a job.
const READ_BLOCK: Duration = Duration::from_secs(5);

pub struct Worker {
    repo: Arc<dyn Repository>,
    broker: Arc<dyn StreamBroker>,
    bus: Arc<dyn EventBus>,
    consumer: String,
    client: reqwest::Client,
}

impl Worker {
    /// `consumer` names this worker inside the shared group; `probe_timeout`
    /// bounds the whole probe exchange (DNS, connect, TLS, request, response
    /// headers).
    pub fn new(
        repo: Arc<dyn Repository>,
        broker: Arc<dyn StreamBroker>,
        bus: Arc<dyn EventBus>,
        consumer: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            broker,
            bus,
            consumer: consumer.into(),
            client: reqwest::Client::builder()
                .timeout(probe_timeout)
                // Redirects are followed; classification applies to the
                // final hop's status.
                .redirect(reqwest::redirect::Policy::limited(10))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    /// Run until shutdown. Failing to create the consumer group is fatal:
    /// without it no forward progress is possible.
    #[instrument(skip_all, fields(consumer = %self.consumer))]
    pub async fn run(self, mut shutdown: Shutdown) -> anyhow::Result<()> {
        self.broker
            .ensure_group(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP, StartPosition::Tail)
            .await
            .context("failed to create consumer group")?;

        info!("worker started, waiting for jobs");
        loop {
            let read = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("worker stopped");
                    return Ok(());
                }
                read = self.broker.read_group(
                    HEALTH_CHECK_STREAM,
                    HEALTH_CHECK_GROUP,
                    &self.consumer,
                    1,
                    READ_BLOCK,
                ) => read,
            };

            let messages = match read {
                Ok(messages) => messages,
                Err(e) => {
                    error!("failed to read from stream: {e}");
                    continue;
                }
            };

            for message in messages {
                if let Err(e) = self.process_job(&message.fields).await {
                    // No ack: the broker keeps the job pending and a future
                    // read can redeliver it.
                    error!(message_id = %message.id, "failed to process job: {e:#}");
                    continue;
                }

                if let Err(e) = self
                    .broker
                    .ack(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP, &message.id)
                    .await
                {
                    error!(message_id = %message.id, "failed to acknowledge message: {e}");
                }
            }
        }
    }

    async fn process_job(&self, fields: &HashMap<String, FieldValue>) -> anyhow::Result<()> {
        let service_id = parse_service_id(fields.get("service_id"))?;
        let url = fields
            .get("url")
            .and_then(FieldValue::as_text)
            .map(str::to_owned)
            .context("failed to parse url")?;

        // A store hiccup here downgrades to "no prior outcome": the probe
        // still persists, and no transition is emitted against an unknown
        // baseline.
        let previous = match self.repo.latest_health_check(service_id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(service_id, "failed to get latest health check: {e}");
                None
            }
        };

        let start = Instant::now();
        let response = self.client.get(&url).send().await;
        let latency = start.elapsed().as_millis() as i32;

        let status = match response {
            Ok(resp) => classify_status(resp.status().as_u16()),
            // Transport errors and timeouts are valid DOWN outcomes, not
            // job failures.
            Err(_) => ProbeStatus::Down,
        };

        self.repo
            .create_health_check(NewHealthCheck {
                service_id,
                status,
                latency,
            })
            .await
            .context("failed to persist health check")?;

        if let Some(previous) = previous {
            if previous.status != status {
                info!(
                    service_id,
                    old_status = %previous.status,
                    new_status = %status,
                    "status change detected"
                );
                self.bus.publish(MonitorEvent::StatusChange(StatusChangeEvent {
                    service_id,
                    old_status: previous.status,
                    new_status: status,
                    timestamp: Utc::now(),
                }));
            }
        }

        Ok(())
    }
}

/// `Up` iff the final response status is in [200, 300). The body is never
/// read or inspected.
pub fn classify_status(status_code: u16) -> ProbeStatus {
    if (200..300).contains(&status_code) {
        ProbeStatus::Up
    } else {
        ProbeStatus::Down
    }
}

/// Jobs cross a broker-dependent wire format: the id may come back as text,
/// raw integer, or bytes.
fn parse_service_id(value: Option<&FieldValue>) -> anyhow::Result<ServiceId> {
    match value {
        Some(FieldValue::Str(s)) => s
            .parse()
            .with_context(|| format!("failed to parse service id {s:?}")),
        Some(FieldValue::Bytes(b)) => std::str::from_utf8(b)
            .context("service id is not valid UTF-8")?
            .parse()
            .context("failed to parse service id bytes"),
        Some(FieldValue::Int(i)) => Ok(*i),
        None => bail!("job is missing a service id"),
    }
}
