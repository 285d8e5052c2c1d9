//! Postgres-backed store.
//!
//! Uses a pooled sqlx connection and runs the bundled migrations on startup.
//! Row-level locking gives `claim_due_services` its multi-scheduler safety:
//! the inner select takes `FOR UPDATE SKIP LOCKED`, so two replicas claiming
//! at the same instant partition the due set instead of double-claiming or
//! blocking on one another.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use super::error::{StoreError, StoreResult};
use super::repository::Repository;
use crate::{HealthCheck, NewHealthCheck, NewService, ProbeStatus, Service, ServiceId};

pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connect, pool, and migrate.
    #[instrument(skip_all)]
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!("postgres connection pool created");

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self { pool })
    }

    /// Wrap an existing pool. Used when the caller manages migrations.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn service_from_row(row: &PgRow) -> StoreResult<Service> {
        Ok(Service {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            check_interval: row.try_get("check_interval")?,
            next_run_at: row.try_get("next_run_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn health_check_from_row(row: &PgRow) -> StoreResult<HealthCheck> {
        let status: String = row.try_get("status")?;
        let status = status
            .parse::<ProbeStatus>()
            .map_err(StoreError::DecodeFailed)?;

        Ok(HealthCheck {
            id: row.try_get("id")?,
            service_id: row.try_get("service_id")?,
            status,
            latency: row.try_get("latency")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    #[instrument(skip(self), fields(name = %service.name))]
    async fn create_service(&self, service: NewService) -> StoreResult<Service> {
        let row = sqlx::query(
            r#"
            INSERT INTO services (name, url, check_interval, next_run_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, url, check_interval, next_run_at, created_at
            "#,
        )
        .bind(&service.name)
        .bind(&service.url)
        .bind(service.check_interval)
        .bind(service.next_run_at)
        .fetch_one(&self.pool)
        .await?;

        Self::service_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn list_services(&self) -> StoreResult<Vec<Service>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, url, check_interval, next_run_at, created_at
            FROM services
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::service_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn claim_due_services(&self) -> StoreResult<Vec<Service>> {
        // Single statement: the skip-locked select and the advance commit
        // together, so a claimed row is never visible as due to a sibling.
        let rows = sqlx::query(
            r#"
            UPDATE services
            SET next_run_at = now() + make_interval(secs => check_interval)
            WHERE id IN (
                SELECT id FROM services
                WHERE next_run_at <= now()
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, name, url, check_interval, next_run_at, created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let claimed: StoreResult<Vec<Service>> =
            rows.iter().map(Self::service_from_row).collect();
        let claimed = claimed?;
        if !claimed.is_empty() {
            debug!("claimed {} due services", claimed.len());
        }
        Ok(claimed)
    }

    #[instrument(skip(self), fields(service_id = check.service_id))]
    async fn create_health_check(&self, check: NewHealthCheck) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO health_checks (service_id, status, latency)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(check.service_id)
        .bind(check.status.as_str())
        .bind(check.latency)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest_health_check(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Option<HealthCheck>> {
        let row = sqlx::query(
            r#"
            SELECT id, service_id, status, latency, created_at
            FROM health_checks
            WHERE service_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::health_check_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn health_checks_for_service(
        &self,
        service_id: ServiceId,
        page: i64,
        limit: i64,
    ) -> StoreResult<Vec<HealthCheck>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, status, latency, created_at
            FROM health_checks
            WHERE service_id = $1
            ORDER BY created_at DESC
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(service_id)
        .bind((page - 1) * limit)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::health_check_from_row).collect()
    }
}
