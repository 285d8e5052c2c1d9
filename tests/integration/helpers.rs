//! Helper functions for integration tests

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::mpsc;

use upwatch::events::{EventBus, InMemoryEventBus, MonitorEvent, STATUS_CHANGE, StatusChangeEvent};
use upwatch::store::{MemoryRepository, Repository};
use upwatch::stream::{HEALTH_CHECK_GROUP, HEALTH_CHECK_STREAM, MemoryBroker, StartPosition, StreamBroker};
use upwatch::{NewService, Service};

/// Register a service that is already due, so the next scheduler tick
/// claims it.
pub async fn seed_due_service(repo: &MemoryRepository, url: &str, interval: i32) -> Service {
    repo.create_service(NewService {
        name: format!("svc-{url}"),
        url: url.to_string(),
        check_interval: interval,
        next_run_at: Utc::now() - ChronoDuration::seconds(1),
    })
    .await
    .unwrap()
}

/// A broker with the worker group already created at the tail, so jobs
/// appended by the test or a scheduler are visible to workers regardless of
/// startup order.
pub async fn broker_with_group() -> MemoryBroker {
    let broker = MemoryBroker::new();
    broker
        .ensure_group(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP, StartPosition::Tail)
        .await
        .unwrap();
    broker
}

/// Subscribe a capture channel to status changes on the bus.
pub fn capture_status_changes(
    bus: &InMemoryEventBus,
) -> mpsc::UnboundedReceiver<StatusChangeEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.subscribe(
        STATUS_CHANGE,
        Arc::new(move |event| {
            let tx = tx.clone();
            Box::pin(async move {
                let MonitorEvent::StatusChange(change) = event;
                let _ = tx.send(change);
            })
        }),
    );
    rx
}

/// Append a well-formed probe job directly to the stream.
pub async fn enqueue_job(broker: &MemoryBroker, service_id: i64, url: &str) {
    broker
        .append(
            HEALTH_CHECK_STREAM,
            &[
                ("service_id", service_id.to_string()),
                ("url", url.to_string()),
            ],
        )
        .await
        .unwrap();
}

/// Poll until `predicate` holds or the deadline lapses. Returns whether the
/// predicate was ever observed true.
pub async fn wait_for(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= end {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
