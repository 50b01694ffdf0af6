use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{OrderOutcome, OrderSide, OrderType, SagaStep, TimeInForce};

// ============================================================================
// Order Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequestV1 {
    /// Caller-chosen id, also the workflow identity
    pub bet_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    /// Workflow running, no result within the wait window
    Started,
    /// A result arrived within the wait window
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmitResponse {
    pub bet_order_id: String,
    pub status: SubmitStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OrderOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_qty: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_timeout: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub bet_order_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResponse {
    pub bet_order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusResponse {
    pub bet_order_id: String,
    pub step: SagaStep,
    pub outcome: OrderOutcome,
    pub amount: Decimal,
    pub filled_qty: Decimal,
    pub is_timeout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unresolved_remainder: Option<Decimal>,
}

// ============================================================================
// Portfolio Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionQuery {
    pub user_id: String,
    pub symbol: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioQuery {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub user_id: String,
    pub symbol: String,
    pub net_position: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPosition {
    pub symbol: String,
    pub net_position: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResponse {
    pub user_id: String,
    pub positions: Vec<PortfolioPosition>,
    pub total_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
