//! Saga commands and the translations that feed collaborator replies into them

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::state::SagaState;
use crate::contracts::WalletReply;
use crate::domain::{OrderRequest, OrderResult};
use crate::order::{FillReport, OrderReply};
use crate::position::PositionReply;
use crate::runtime::Recipient;

/// Commands accepted by a workflow, keyed by order id
#[derive(Debug)]
pub enum SagaCommand {
    StartWorkflow {
        request: OrderRequest,
        reply_to: Recipient<WorkflowReply>,
    },
    PositionReceived {
        symbol: String,
        net_position: Decimal,
    },
    DebitCompleted {
        correlation_id: String,
        at: DateTime<Utc>,
    },
    DebitFailed {
        correlation_id: String,
        reason: String,
    },
    CreditCompleted {
        correlation_id: String,
        at: DateTime<Utc>,
    },
    CreditFailed {
        correlation_id: String,
        reason: String,
    },
    OrderPlaced {
        order_id: String,
        at: DateTime<Utc>,
    },
    OrderPlacementFailed {
        order_id: String,
        reason: String,
    },
    OrderFillStatusReceived(FillReport),
    GetStatus {
        reply_to: Recipient<OrderResult>,
    },
    GetState {
        reply_to: Recipient<SagaState>,
    },
}

/// Messages delivered to the caller that started a workflow
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowReply {
    WorkflowStarted { order_id: String },
    WorkflowFailed { order_id: String, reason: String },
    OrderResult(OrderResult),
}

impl WorkflowReply {
    pub fn order_id(&self) -> &str {
        match self {
            WorkflowReply::WorkflowStarted { order_id }
            | WorkflowReply::WorkflowFailed { order_id, .. } => order_id,
            WorkflowReply::OrderResult(result) => &result.order_id,
        }
    }
}

impl From<WalletReply> for SagaCommand {
    fn from(reply: WalletReply) -> Self {
        match reply {
            WalletReply::DebitCompleted { correlation_id, at } => {
                SagaCommand::DebitCompleted { correlation_id, at }
            }
            WalletReply::DebitFailed {
                correlation_id,
                reason,
            } => SagaCommand::DebitFailed {
                correlation_id,
                reason,
            },
            WalletReply::CreditCompleted { correlation_id, at } => {
                SagaCommand::CreditCompleted { correlation_id, at }
            }
            WalletReply::CreditFailed {
                correlation_id,
                reason,
            } => SagaCommand::CreditFailed {
                correlation_id,
                reason,
            },
        }
    }
}

impl From<OrderReply> for SagaCommand {
    fn from(reply: OrderReply) -> Self {
        match reply {
            OrderReply::OrderPlaced { order_id, at } => SagaCommand::OrderPlaced { order_id, at },
            OrderReply::OrderRejected { order_id, reason } => {
                SagaCommand::OrderPlacementFailed { order_id, reason }
            }
            OrderReply::FillStatus(report) => SagaCommand::OrderFillStatusReceived(report),
        }
    }
}

impl SagaCommand {
    /// Only position query results concern a workflow
    pub fn from_position_reply(reply: PositionReply) -> Option<Self> {
        match reply {
            PositionReply::PositionResult {
                symbol,
                net_position,
            } => Some(SagaCommand::PositionReceived {
                symbol,
                net_position,
            }),
            PositionReply::Ack { .. } | PositionReply::Positions { .. } => None,
        }
    }
}
