//! In-memory store (no persistence).
//!
//! Backs the pipeline in tests. The claim is atomic because the whole state
//! sits behind one mutex, which gives it the same exactly-once property the
//! Postgres skip-locked statement provides.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::error::StoreResult;
use super::repository::Repository;
use crate::{HealthCheck, NewHealthCheck, NewService, Service, ServiceId};

#[derive(Default)]
struct State {
    services: Vec<Service>,
    checks: Vec<HealthCheck>,
    next_service_id: i64,
    next_check_id: i64,
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted outcomes across all services. Test inspection.
    pub fn health_check_count(&self) -> usize {
        self.state.lock().expect("store lock poisoned").checks.len()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_service(&self, service: NewService) -> StoreResult<Service> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.next_service_id += 1;
        let service = Service {
            id: state.next_service_id,
            name: service.name,
            url: service.url,
            check_interval: service.check_interval,
            next_run_at: service.next_run_at,
            created_at: Utc::now(),
        };
        state.services.push(service.clone());
        Ok(service)
    }

    async fn list_services(&self) -> StoreResult<Vec<Service>> {
        let state = self.state.lock().expect("store lock poisoned");
        let mut services = state.services.clone();
        services.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(services)
    }

    async fn claim_due_services(&self) -> StoreResult<Vec<Service>> {
        let mut state = self.state.lock().expect("store lock poisoned");
        let now = Utc::now();
        let mut claimed = Vec::new();
        for service in &mut state.services {
            if service.next_run_at <= now {
                service.next_run_at = now + Duration::seconds(service.check_interval as i64);
                claimed.push(service.clone());
            }
        }
        Ok(claimed)
    }

    async fn create_health_check(&self, check: NewHealthCheck) -> StoreResult<()> {
        let mut state = self.state.lock().expect("store lock poisoned");
        state.next_check_id += 1;
        let check = HealthCheck {
            id: state.next_check_id,
            service_id: check.service_id,
            status: check.status,
            latency: check.latency,
            created_at: Utc::now(),
        };
        state.checks.push(check);
        Ok(())
    }

    async fn latest_health_check(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Option<HealthCheck>> {
        let state = self.state.lock().expect("store lock poisoned");
        // Insertion order is persistence order; the latest row wins even when
        // wall-clock timestamps collide.
        Ok(state
            .checks
            .iter()
            .rev()
            .find(|c| c.service_id == service_id)
            .cloned())
    }

    async fn health_checks_for_service(
        &self,
        service_id: ServiceId,
        page: i64,
        limit: i64,
    ) -> StoreResult<Vec<HealthCheck>> {
        let state = self.state.lock().expect("store lock poisoned");
        let offset = ((page - 1) * limit).max(0) as usize;
        Ok(state
            .checks
            .iter()
            .rev()
            .filter(|c| c.service_id == service_id)
            .skip(offset)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
