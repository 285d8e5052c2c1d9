//! Due-service claim loop.
//!
//! On every tick the scheduler claims the full due set in one atomic store
//! operation, then appends one probe job per claimed service. Claiming first
//! keeps the cadence on wall-clock time: a backlogged stream slows the
//! appends but never costs a tick, because the next tick claims everything
//! due again. The trade-off is the crash window between claim commit and
//! append: a claim lost there skips that service for one cycle, which this
//! pipeline prefers over the duplicate dispatch the reverse order risks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::Service;
use crate::shutdown::Shutdown;
use crate::store::Repository;
use crate::stream::{BrokerResult, HEALTH_CHECK_STREAM, StreamBroker};

pub struct Scheduler {
    repo: Arc<dyn Repository>,
    broker: Arc<dyn StreamBroker>,
    tick_interval: Duration,
}

impl Scheduler {
    /// More than one scheduler may run; the claim is atomic, so replicas
    /// partition the due set instead of duplicating it.
    pub fn new(
        repo: Arc<dyn Repository>,
        broker: Arc<dyn StreamBroker>,
        tick_interval_secs: u64,
    ) -> Self {
        Self {
            repo,
            broker,
            tick_interval: Duration::from_secs(tick_interval_secs),
        }
    }

    /// Run until shutdown. The first tick fires one interval after start.
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown: Shutdown) {
        info!(
            tick_interval_seconds = self.tick_interval.as_secs(),
            "scheduler started"
        );

        let start = time::Instant::now() + self.tick_interval;
        let mut ticker = time::interval_at(start, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let due = match self.repo.claim_due_services().await {
            Ok(due) => due,
            Err(e) => {
                // The next tick is the retry; no backoff.
                error!("failed to claim due services: {e}");
                return;
            }
        };

        if !due.is_empty() {
            debug!("claimed {} due services", due.len());
        }

        for service in due {
            if let Err(e) = self.enqueue(&service).await {
                // next_run_at already advanced, so this cycle is skipped for
                // the service; siblings still get their jobs.
                error!(service_id = service.id, "failed to enqueue service: {e}");
            }
        }
    }

    async fn enqueue(&self, service: &Service) -> BrokerResult<()> {
        self.broker
            .append(
                HEALTH_CHECK_STREAM,
                &[
                    ("service_id", service.id.to_string()),
                    ("url", service.url.clone()),
                ],
            )
            .await
    }
}
