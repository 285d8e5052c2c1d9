use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};

/// Default probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Default scheduler tick interval in seconds.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 1;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string (`DATABASE_URL`).
    pub database_url: String,

    /// Redis connection string (`REDIS_URL`), e.g. `redis://127.0.0.1:6379`.
    pub redis_url: String,

    /// API bind address (`BIND_ADDR`, default `127.0.0.1:8080`).
    pub bind_addr: SocketAddr,

    /// Scheduler tick interval in whole seconds (`SCHEDULER_TICK_INTERVAL`).
    pub tick_interval_secs: u64,

    /// Hard total timeout for a single probe (`PROBE_TIMEOUT`, seconds).
    pub probe_timeout: Duration,

    /// Consumer identity within the worker group (`WORKER_CONSUMER`).
    pub worker_consumer: String,

    /// Static bearer token for the API (`AUTH_TOKEN`). Absent disables auth.
    pub auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = require("DATABASE_URL")?;
        let redis_url = require("REDIS_URL")?;

        let bind_addr = optional("BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse()
            .context("BIND_ADDR is not a valid socket address")?;

        let tick_interval_secs =
            parse_secs("SCHEDULER_TICK_INTERVAL", DEFAULT_TICK_INTERVAL_SECS)?;
        let probe_timeout_secs = parse_secs("PROBE_TIMEOUT", DEFAULT_PROBE_TIMEOUT_SECS)?;

        Ok(Self {
            database_url,
            redis_url,
            bind_addr,
            tick_interval_secs,
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            worker_consumer: optional("WORKER_CONSUMER")
                .unwrap_or_else(|| "worker_1".to_string()),
            auth_token: optional("AUTH_TOKEN"),
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    optional(name).with_context(|| format!("{name} must be set"))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_secs(name: &str, default: u64) -> anyhow::Result<u64> {
    let Some(raw) = optional(name) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{name} must be a whole number of seconds"))?;
    if secs == 0 {
        bail!("{name} must be at least 1 second");
    }
    Ok(secs)
}
