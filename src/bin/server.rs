use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use upwatch::api::{ApiConfig, ApiState, spawn_api_server};
use upwatch::config::Config;
use upwatch::events::{EventBus, InMemoryEventBus, MonitorEvent, STATUS_CHANGE};
use upwatch::hub::Hub;
use upwatch::scheduler::Scheduler;
use upwatch::shutdown;
use upwatch::store::{PostgresRepository, Repository};
use upwatch::stream::{RedisStreamBroker, StreamBroker};
use upwatch::worker::Worker;

const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Number of workers to run in this process
    #[arg(long, default_value_t = 1)]
    workers: usize,
}

fn init_tracing() {
    let filter = filter::Targets::new().with_targets(vec![
        ("upwatch", LevelFilter::DEBUG),
        ("server", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

/// Retry a startup connection a few times with linearly growing waits. The
/// database and broker routinely come up after the service in container
/// deployments.
async fn connect_with_retry<T, F, Fut, E>(what: &str, connect: F) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < CONNECT_ATTEMPTS {
                    let wait = Duration::from_secs(attempt as u64);
                    warn!("{what} connection failed, retrying in {wait:?}: {e}");
                    tokio::time::sleep(wait).await;
                }
                last_error = Some(e.to_string());
            }
        }
    }
    anyhow::bail!(
        "failed to connect to {what} after {CONNECT_ATTEMPTS} attempts: {}",
        last_error.unwrap_or_default()
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    info!("starting uptime monitor");

    let repo: Arc<dyn Repository> = Arc::new(
        connect_with_retry("postgres", || {
            PostgresRepository::connect(&config.database_url)
        })
        .await?,
    );

    let broker: Arc<dyn StreamBroker> = Arc::new(
        connect_with_retry("redis", || RedisStreamBroker::connect(&config.redis_url)).await?,
    );

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new());

    let (controller, root) = shutdown::channel();

    let (hub, hub_handle) = Hub::new();
    let hub_task = tokio::spawn(hub.run(root.clone()));

    // Every status transition the workers witness fans out to subscribers.
    {
        let hub_handle = hub_handle.clone();
        bus.subscribe(
            STATUS_CHANGE,
            Arc::new(move |event| {
                let hub_handle = hub_handle.clone();
                Box::pin(async move {
                    let MonitorEvent::StatusChange(change) = event;
                    if let Err(e) = hub_handle.broadcast_status_change(&change).await {
                        error!("failed to broadcast status change: {e}");
                    }
                })
            }),
        );
    }

    let scheduler = Scheduler::new(repo.clone(), broker.clone(), config.tick_interval_secs);
    let scheduler_task = tokio::spawn(scheduler.run(root.clone()));

    // The only fatal runtime error: a worker that cannot create its
    // consumer group on startup can make no forward progress at all.
    let (fatal_tx, mut fatal_rx) = tokio::sync::mpsc::channel::<anyhow::Error>(1);

    let mut worker_tasks = Vec::new();
    for i in 0..args.workers.max(1) {
        let consumer = if i == 0 {
            config.worker_consumer.clone()
        } else {
            format!("{}_{i}", config.worker_consumer)
        };
        let worker = Worker::new(
            repo.clone(),
            broker.clone(),
            bus.clone(),
            consumer,
            config.probe_timeout,
        );
        let token = root.clone();
        let fatal_tx = fatal_tx.clone();
        worker_tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                let _ = fatal_tx.try_send(e);
            }
        }));
    }

    let api_state = ApiState::new(repo, hub_handle);
    spawn_api_server(
        ApiConfig {
            bind_addr: config.bind_addr,
            auth_token: config.auth_token.clone(),
            enable_cors: true,
        },
        api_state,
    )
    .await?;

    info!("all components started, press Ctrl+C to shut down");

    let exit = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received shutdown signal, stopping"),
                Err(e) => error!("unable to listen for shutdown signal: {e}"),
            }
            Ok(())
        }
        Some(e) = fatal_rx.recv() => {
            error!("worker failed: {e:#}");
            Err(e)
        }
    };

    controller.shutdown();

    scheduler_task.await?;
    for task in worker_tasks {
        if let Err(e) = task.await {
            error!("worker task panicked: {e}");
        }
    }
    hub_task.await?;

    info!("shutdown complete");
    exit
}
