use std::sync::Arc;
use std::time::Duration;

use crate::services::{HealthState, WorkflowService};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub workflows: WorkflowService,
    pub health: Arc<HealthState>,
    /// How long POST /v1/order waits for a result after the workflow starts
    pub result_timeout: Duration,
}

impl AppState {
    pub fn new(workflows: WorkflowService, result_timeout: Duration) -> Self {
        let health = Arc::new(HealthState::new(workflows.system().clone()));
        Self {
            workflows,
            health,
            result_timeout,
        }
    }
}
