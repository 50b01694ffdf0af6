pub mod health;
pub mod workflow;

pub use health::{ComponentHealth, HealthResponse, HealthState, HealthStatus};
pub use workflow::{WorkflowService, WorkflowSubscription};
