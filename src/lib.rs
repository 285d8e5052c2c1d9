//! Distributed uptime monitoring service.
//!
//! Operators register HTTP endpoints with a probe interval. A scheduler
//! claims due services from the store and enqueues probe jobs onto a stream;
//! workers consume the jobs, perform timed GET probes, persist the outcomes,
//! and publish status transitions to an in-process event bus. A fan-out hub
//! subscribes to those transitions and pushes them to every attached
//! WebSocket subscriber.
//!
//! ## Pipeline
//!
//! ```text
//! Scheduler ──claim──▶ Store
//!     │
//!     └──append──▶ Stream ──read──▶ Worker ──persist──▶ Store
//!                                     │
//!                                     └──StatusChange──▶ EventBus ──▶ Hub ──▶ subscribers
//! ```
//!
//! Workers and schedulers are horizontally scalable: the claim is a single
//! `FOR UPDATE SKIP LOCKED` statement, and workers share one consumer group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod api;
pub mod config;
pub mod events;
pub mod hub;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod stream;
pub mod worker;

/// Surrogate key for a registered service.
pub type ServiceId = i64;

/// Classification of a single probe.
///
/// `Up` iff the transport completed and the HTTP status was in [200, 300).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Up,
    Down,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Up => "UP",
            ProbeStatus::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProbeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(ProbeStatus::Up),
            "DOWN" => Ok(ProbeStatus::Down),
            other => Err(format!("unknown probe status: {other}")),
        }
    }
}

/// A registered service and its probe cadence.
#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    pub url: String,
    /// Probe interval in whole seconds, >= 1.
    pub check_interval: i32,
    /// Next due instant. Advanced by the scheduler's claim, never rewound.
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`Service`]. The ingress computes
/// `next_run_at = now + check_interval`.
#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub url: String,
    pub check_interval: i32,
    pub next_run_at: DateTime<Utc>,
}

/// One persisted probe outcome. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub id: i64,
    pub service_id: ServiceId,
    pub status: ProbeStatus,
    /// Wall time from probe start to response or timeout, whole milliseconds.
    pub latency: i32,
    pub created_at: DateTime<Utc>,
}

/// Insert form of [`HealthCheck`].
#[derive(Debug, Clone)]
pub struct NewHealthCheck {
    pub service_id: ServiceId,
    pub status: ProbeStatus,
    pub latency: i32,
}
