//! Order workflow coordinator
//!
//! One saga per order id. It moves funds from the user's wallet through the
//! exchange-side intermediary wallet, places the order and tracks its fills,
//! compensating completed steps when a later one fails.

pub mod bootstrap;
pub mod command;
pub mod coordinator;
pub mod state;

pub use bootstrap::{persistence_from_config, OrderSystem};
pub use command::{SagaCommand, WorkflowReply};
pub use coordinator::{correlation_id, SagaCoordinator, ALREADY_STARTED};
pub use state::{FailureKind, SagaEvent, SagaFailure, SagaState};
