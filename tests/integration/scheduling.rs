//! Scheduler claim semantics under concurrency and failure.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use upwatch::scheduler::Scheduler;
use upwatch::shutdown;
use upwatch::store::{MemoryRepository, Repository};
use upwatch::stream::{
    BrokerError, BrokerResult, FieldValue, HEALTH_CHECK_STREAM, MemoryBroker, StartPosition,
    StreamBroker, StreamMessage,
};
use upwatch::NewService;

use super::helpers::*;

#[tokio::test(start_paused = true)]
async fn two_schedulers_claim_each_service_exactly_once() {
    let repo = Arc::new(MemoryRepository::new());
    let broker = MemoryBroker::new();

    let mut expected_ids = HashSet::new();
    for i in 0..10 {
        let service = seed_due_service(&repo, &format!("http://svc-{i}.internal/"), 60).await;
        expected_ids.insert(service.id.to_string());
    }

    let (controller, token) = shutdown::channel();
    let replica_a = Scheduler::new(repo.clone(), Arc::new(broker.clone()), 1);
    let replica_b = Scheduler::new(repo.clone(), Arc::new(broker.clone()), 1);
    let task_a = tokio::spawn(replica_a.run(token.clone()));
    let task_b = tokio::spawn(replica_b.run(token));

    // Let both replicas take their first tick.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    controller.shutdown();
    task_a.await.unwrap();
    task_b.await.unwrap();

    let messages = broker.messages(HEALTH_CHECK_STREAM);
    let seen: Vec<String> = messages
        .iter()
        .map(|m| match &m.fields["service_id"] {
            FieldValue::Str(s) => s.clone(),
            other => panic!("unexpected field shape: {other:?}"),
        })
        .collect();

    assert_eq!(seen.len(), 10, "every due service appears exactly once");
    assert_eq!(seen.iter().cloned().collect::<HashSet<_>>(), expected_ids);
}

// Real time: the claim compares against the wall clock, so the second claim
// only becomes due after genuinely waiting out the interval.
#[tokio::test]
async fn successive_claims_advance_next_run_at_by_at_least_the_interval() {
    let repo = MemoryRepository::new();
    repo.create_service(NewService {
        name: "svc".to_string(),
        url: "http://svc.internal/".to_string(),
        check_interval: 1,
        next_run_at: Utc::now() - ChronoDuration::seconds(1),
    })
    .await
    .unwrap();

    let first = repo.claim_due_services().await.unwrap().remove(0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = repo.claim_due_services().await.unwrap().remove(0);

    assert!(second.next_run_at >= first.next_run_at + ChronoDuration::seconds(1));
}

/// Broker whose appends always fail, for exercising the skip path.
struct RefusingBroker;

#[async_trait]
impl StreamBroker for RefusingBroker {
    async fn append(&self, _stream: &str, _fields: &[(&str, String)]) -> BrokerResult<()> {
        Err(BrokerError::CommandFailed("append refused".to_string()))
    }

    async fn ensure_group(
        &self,
        _stream: &str,
        _group: &str,
        _start: StartPosition,
    ) -> BrokerResult<()> {
        Ok(())
    }

    async fn read_group(
        &self,
        _stream: &str,
        _group: &str,
        _consumer: &str,
        _count: usize,
        _block: Duration,
    ) -> BrokerResult<Vec<StreamMessage>> {
        Ok(Vec::new())
    }

    async fn ack(&self, _stream: &str, _group: &str, _message_id: &str) -> BrokerResult<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn enqueue_failure_skips_the_cycle_instead_of_rewinding_the_claim() {
    let repo = Arc::new(MemoryRepository::new());
    seed_due_service(&repo, "http://svc.internal/", 60).await;

    let (controller, token) = shutdown::channel();
    let scheduler = Scheduler::new(repo.clone(), Arc::new(RefusingBroker), 1);
    let task = tokio::spawn(scheduler.run(token));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    controller.shutdown();
    task.await.unwrap();

    // The claim advanced next_run_at even though the append failed, so the
    // service is not due again until its next natural tick.
    assert!(repo.claim_due_services().await.unwrap().is_empty());

    let services = repo.list_services().await.unwrap();
    assert!(services[0].next_run_at > Utc::now());
}
