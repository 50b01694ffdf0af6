pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod order;
pub mod persistence;
pub mod position;
pub mod runtime;
pub mod services;

pub use config::AppConfig;
pub use coordinator::{
    OrderSystem, SagaCommand, SagaCoordinator, SagaState, WorkflowReply,
};
pub use domain::{
    FillStatus, OrderOutcome, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType,
    SagaStep, TimeInForce,
};
pub use error::{OrderflowError, Result};
pub use order::{OrderCommand, OrderEntity};
pub use persistence::{EventMetadata, Persistence, SnapshotPolicy, StoredEvent};
pub use position::{PositionCommand, PositionLedger};
pub use services::{WorkflowService, WorkflowSubscription};
