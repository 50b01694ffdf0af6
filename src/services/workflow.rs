//! Caller-facing workflow operations
//!
//! Thin request/response layer over the entity registries, used by the HTTP
//! API and the CLI.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::contracts::GatewayCommand;
use crate::coordinator::{OrderSystem, SagaCommand, SagaCoordinator, SagaState, WorkflowReply};
use crate::domain::{OrderRequest, OrderResult};
use crate::error::{OrderflowError, Result};
use crate::order::{OrderCommand, OrderEntity, OrderEntityState};
use crate::position::{PositionCommand, PositionReply};
use crate::runtime::{Entity, EntityResolver, Recipient};

/// First answer to a StartWorkflow plus the stream of later results
#[derive(Debug)]
pub struct WorkflowSubscription {
    pub order_id: String,
    pub first: WorkflowReply,
    updates: mpsc::UnboundedReceiver<WorkflowReply>,
}

impl WorkflowSubscription {
    pub fn started(&self) -> bool {
        matches!(self.first, WorkflowReply::WorkflowStarted { .. })
    }

    /// Next pushed result, `None` on timeout or when the workflow lets go of
    /// the handle
    pub async fn next_update(&mut self, within: Duration) -> Option<WorkflowReply> {
        tokio::time::timeout(within, self.updates.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Clone)]
pub struct WorkflowService {
    system: Arc<OrderSystem>,
    ask_timeout: Duration,
}

impl WorkflowService {
    pub fn new(system: Arc<OrderSystem>, ask_timeout: Duration) -> Self {
        Self {
            system,
            ask_timeout,
        }
    }

    pub fn system(&self) -> &Arc<OrderSystem> {
        &self.system
    }

    pub async fn start_workflow(&self, request: OrderRequest) -> Result<WorkflowSubscription> {
        if request.order_id.trim().is_empty() {
            return Err(OrderflowError::Validation("order_id is required".to_string()));
        }
        let order_id = request.order_id.clone();
        let saga = self.system.workflows.resolve(&order_id)?;

        let (tx, mut updates) = mpsc::unbounded_channel();
        let sent = saga.tell(SagaCommand::StartWorkflow {
            request,
            reply_to: Recipient::from_channel(tx),
        });
        if !sent {
            return Err(OrderflowError::EntityUnavailable(format!(
                "{}/{}",
                saga.entity_type(),
                order_id
            )));
        }

        let first = match tokio::time::timeout(self.ask_timeout, updates.recv()).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                return Err(OrderflowError::EntityUnavailable(format!(
                    "{}/{}",
                    saga.entity_type(),
                    order_id
                )))
            }
            Err(_) => {
                return Err(OrderflowError::AskTimeout {
                    target: format!("{}/{}", saga.entity_type(), order_id),
                    elapsed_ms: self.ask_timeout.as_millis() as u64,
                })
            }
        };
        info!(%order_id, reply = ?first, "Workflow start answered");

        Ok(WorkflowSubscription {
            order_id,
            first,
            updates,
        })
    }

    /// Fails with NotFound unless the stream has events. Reads the journal
    /// only, so no instance is started for unknown ids.
    async fn ensure_exists(&self, entity_type: &str, order_id: &str) -> Result<()> {
        let latest = self
            .system
            .persistence
            .journal
            .latest_sequence(entity_type, order_id)
            .await?;
        if latest == 0 {
            return Err(OrderflowError::NotFound(format!("order {}", order_id)));
        }
        Ok(())
    }

    pub async fn workflow_state(&self, order_id: &str) -> Result<SagaState> {
        self.ensure_exists(SagaCoordinator::ENTITY_TYPE, order_id).await?;
        self.system
            .workflows
            .resolve(order_id)?
            .ask(|reply_to| SagaCommand::GetState { reply_to }, self.ask_timeout)
            .await
    }

    pub async fn get_status(&self, order_id: &str) -> Result<OrderResult> {
        self.ensure_exists(SagaCoordinator::ENTITY_TYPE, order_id).await?;
        self.system
            .workflows
            .resolve(order_id)?
            .ask(|reply_to| SagaCommand::GetStatus { reply_to }, self.ask_timeout)
            .await
    }

    pub async fn order_state(&self, order_id: &str) -> Result<OrderEntityState> {
        self.ensure_exists(OrderEntity::ENTITY_TYPE, order_id).await?;
        self.system
            .orders
            .resolve(order_id)?
            .ask(|reply_to| OrderCommand::GetOrderState { reply_to }, self.ask_timeout)
            .await
    }

    pub async fn position(&self, user_id: &str, symbol: &str) -> Result<Decimal> {
        let symbol = symbol.to_string();
        let reply = self
            .system
            .positions
            .resolve(user_id)?
            .ask(
                |reply_to| PositionCommand::GetPosition { symbol, reply_to },
                self.ask_timeout,
            )
            .await?;
        match reply {
            PositionReply::PositionResult { net_position, .. } => Ok(net_position),
            other => Err(OrderflowError::Internal(format!(
                "unexpected position reply {:?}",
                other
            ))),
        }
    }

    pub async fn positions(&self, user_id: &str) -> Result<BTreeMap<String, Decimal>> {
        let reply = self
            .system
            .positions
            .resolve(user_id)?
            .ask(
                |reply_to| PositionCommand::GetPositions { reply_to },
                self.ask_timeout,
            )
            .await?;
        match reply {
            PositionReply::Positions { positions } => Ok(positions),
            other => Err(OrderflowError::Internal(format!(
                "unexpected position reply {:?}",
                other
            ))),
        }
    }

    /// Ask the exchange to cancel an open order. The outcome arrives as a
    /// CANCELLED fill status on the workflow.
    pub async fn cancel_order(&self, order_id: &str, reason: Option<String>) -> Result<()> {
        let state = self.order_state(order_id).await?;
        if !state.status.accepts_fills() {
            return Err(OrderflowError::Validation(format!(
                "Order {} is not open (status {})",
                order_id, state.status
            )));
        }

        let reason = reason.unwrap_or_else(|| "Cancelled by user".to_string());
        debug!(%order_id, %reason, "Requesting cancellation");
        if !self.system.gateway.tell(GatewayCommand::CancelOrder {
            order_id: order_id.to_string(),
            reason,
        }) {
            return Err(OrderflowError::EntityUnavailable("exchange gateway".to_string()));
        }
        Ok(())
    }
}
