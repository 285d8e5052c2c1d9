//! Store trait definition.

use async_trait::async_trait;

use super::error::StoreResult;
use crate::{HealthCheck, NewHealthCheck, NewService, Service, ServiceId};

/// Capability interface over the persistent store.
///
/// Implementations must be `Send + Sync`; every method maps one store
/// round-trip and returns the underlying error unretried. Callers decide.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a new service. Fails on constraint violation.
    async fn create_service(&self, service: NewService) -> StoreResult<Service>;

    /// All services, newest first. Ingress only.
    async fn list_services(&self) -> StoreResult<Vec<Service>>;

    /// Atomically claim every due service and advance its `next_run_at` by
    /// its own interval. Rows locked by a concurrent claimer are skipped, not
    /// waited on, so replicas never hand out the same service twice.
    async fn claim_due_services(&self) -> StoreResult<Vec<Service>>;

    /// Append one probe outcome.
    async fn create_health_check(&self, check: NewHealthCheck) -> StoreResult<()>;

    /// Most recent outcome for a service, or `None` when the service has
    /// never been probed. `None` is not a status transition.
    async fn latest_health_check(
        &self,
        service_id: ServiceId,
    ) -> StoreResult<Option<HealthCheck>>;

    /// Page of outcomes, newest first. `page` starts at 1. Ingress only.
    async fn health_checks_for_service(
        &self,
        service_id: ServiceId,
        page: i64,
        limit: i64,
    ) -> StoreResult<Vec<HealthCheck>>;
}
