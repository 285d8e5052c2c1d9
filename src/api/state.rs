//! API shared state

use std::sync::Arc;

use crate::hub::HubHandle;
use crate::store::Repository;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Store for service registration and probe-outcome queries
    pub repo: Arc<dyn Repository>,

    /// Handle to the fan-out hub for attaching subscribers
    pub hub: HubHandle,
}

impl ApiState {
    pub fn new(repo: Arc<dyn Repository>, hub: HubHandle) -> Self {
        Self { repo, hub }
    }
}
