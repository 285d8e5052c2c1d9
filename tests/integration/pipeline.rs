//! End-to-end pipeline tests: scheduler → stream → worker → store → events.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use upwatch::events::InMemoryEventBus;
use upwatch::scheduler::Scheduler;
use upwatch::shutdown;
use upwatch::store::{MemoryRepository, Repository};
use upwatch::stream::{HEALTH_CHECK_GROUP, HEALTH_CHECK_STREAM, StreamBroker};
use upwatch::worker::Worker;
use upwatch::{NewHealthCheck, ProbeStatus};

use super::helpers::*;

struct Pipeline {
    repo: Arc<MemoryRepository>,
    broker: upwatch::stream::MemoryBroker,
    bus: Arc<InMemoryEventBus>,
    controller: shutdown::ShutdownController,
}

impl Pipeline {
    /// Spawn one worker (and optionally a scheduler) over shared in-memory
    /// infrastructure.
    async fn start(with_scheduler: bool, probe_timeout: Duration) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let broker = broker_with_group().await;
        let bus = Arc::new(InMemoryEventBus::new());
        let (controller, token) = shutdown::channel();

        let worker = Worker::new(
            repo.clone(),
            Arc::new(broker.clone()),
            bus.clone(),
            "worker_1",
            probe_timeout,
        );
        tokio::spawn(worker.run(token.clone()));

        if with_scheduler {
            let scheduler = Scheduler::new(repo.clone(), Arc::new(broker.clone()), 1);
            tokio::spawn(scheduler.run(token));
        }

        Self {
            repo,
            broker,
            bus,
            controller,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

#[tokio::test]
async fn first_probe_of_fresh_service_is_up_with_no_event() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::start(true, Duration::from_secs(5)).await;
    let mut events = capture_status_changes(&pipeline.bus);
    let service = seed_due_service(&pipeline.repo, &mock_server.uri(), 60).await;

    // One scheduler tick plus probe time.
    assert!(
        wait_for(Duration::from_secs(3), || {
            pipeline.repo.health_check_count() >= 1
        })
        .await,
        "no probe outcome appeared within two ticks"
    );

    let latest = pipeline
        .repo
        .latest_health_check(service.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.status, ProbeStatus::Up);
    assert!(latest.latency >= 0);

    // A first outcome has no predecessor, so nothing was emitted.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn up_to_down_transition_emits_one_event() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::start(true, Duration::from_secs(5)).await;
    let mut events = capture_status_changes(&pipeline.bus);

    let service = seed_due_service(&pipeline.repo, &mock_server.uri(), 60).await;
    pipeline
        .repo
        .create_health_check(NewHealthCheck {
            service_id: service.id,
            status: ProbeStatus::Up,
            latency: 5,
        })
        .await
        .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(3), events.recv())
        .await
        .expect("no status change within two ticks")
        .unwrap();

    assert_eq!(change.service_id, service.id);
    assert_eq!(change.old_status, ProbeStatus::Up);
    assert_eq!(change.new_status, ProbeStatus::Down);

    // The outcome was durable before the event went out.
    let latest = pipeline
        .repo
        .latest_health_check(service.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.status, ProbeStatus::Down);

    // Exactly one transition.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_delivery_persists_both_outcomes_but_emits_once() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::start(false, Duration::from_secs(5)).await;
    let mut events = capture_status_changes(&pipeline.bus);

    let service = seed_due_service(&pipeline.repo, &mock_server.uri(), 60).await;
    pipeline
        .repo
        .create_health_check(NewHealthCheck {
            service_id: service.id,
            status: ProbeStatus::Up,
            latency: 5,
        })
        .await
        .unwrap();

    // The same job delivered twice, as after a worker crash and redelivery.
    enqueue_job(&pipeline.broker, service.id, &service.url).await;
    enqueue_job(&pipeline.broker, service.id, &service.url).await;

    assert!(
        wait_for(Duration::from_secs(3), || {
            pipeline.repo.health_check_count() >= 3
        })
        .await,
        "both deliveries should persist outcomes"
    );

    // First processing flipped UP→DOWN; the second saw DOWN as the prior
    // persisted row, so the emission stayed monotonic.
    let change = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("transition event missing")
        .unwrap();
    assert_eq!(change.new_status, ProbeStatus::Down);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn poison_job_is_never_acked_and_rejected_identically_on_redelivery() {
    let pipeline = Pipeline::start(false, Duration::from_secs(1)).await;

    pipeline
        .broker
        .append(
            HEALTH_CHECK_STREAM,
            &[
                ("service_id", "not-a-number".to_string()),
                ("url", "http://localhost/".to_string()),
            ],
        )
        .await
        .unwrap();

    assert!(
        wait_for(Duration::from_secs(2), || {
            pipeline
                .broker
                .pending(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP)
                .len()
                == 1
        })
        .await,
        "poison job should be delivered and left pending"
    );
    assert_eq!(pipeline.repo.health_check_count(), 0);

    // Redeliver: the worker rejects it the same way and it stays pending.
    pipeline
        .broker
        .redeliver_pending(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        pipeline
            .broker
            .pending(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP)
            .len(),
        1
    );
    assert_eq!(pipeline.repo.health_check_count(), 0);
}

#[tokio::test]
async fn acked_jobs_leave_nothing_pending() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::start(false, Duration::from_secs(5)).await;
    let service = seed_due_service(&pipeline.repo, &mock_server.uri(), 60).await;

    enqueue_job(&pipeline.broker, service.id, &service.url).await;

    assert!(
        wait_for(Duration::from_secs(2), || {
            pipeline.repo.health_check_count() == 1
        })
        .await
    );
    assert!(
        wait_for(Duration::from_secs(1), || {
            pipeline
                .broker
                .pending(HEALTH_CHECK_STREAM, HEALTH_CHECK_GROUP)
                .is_empty()
        })
        .await,
        "processed job should be acknowledged"
    );
}

#[tokio::test]
async fn probe_timeout_caps_latency_and_classifies_down() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let pipeline = Pipeline::start(false, Duration::from_millis(300)).await;
    let service = seed_due_service(&pipeline.repo, &mock_server.uri(), 60).await;

    enqueue_job(&pipeline.broker, service.id, &service.url).await;

    assert!(
        wait_for(Duration::from_secs(3), || {
            pipeline.repo.health_check_count() == 1
        })
        .await
    );

    let latest = pipeline
        .repo
        .latest_health_check(service.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.status, ProbeStatus::Down);
    assert!(
        latest.latency >= 300 && latest.latency < 5_000,
        "latency should sit at the timeout bound, got {}",
        latest.latency
    );
}
