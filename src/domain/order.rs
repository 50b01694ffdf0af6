use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{OrderflowError, Result};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Signed position delta for `quantity` traded on this side.
    pub fn signed(&self, quantity: Decimal) -> Decimal {
        match self {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Cancelled
    GTC,
    /// Immediate Or Cancel
    IOC,
    /// Fill Or Kill
    FOK,
}

impl TimeInForce {
    /// Market orders execute immediately or not at all; limit orders rest.
    pub fn default_for(order_type: OrderType) -> Self {
        match order_type {
            OrderType::Market => TimeInForce::IOC,
            OrderType::Limit => TimeInForce::GTC,
        }
    }
}

/// A request to trade a contract on behalf of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Absent for market orders
    pub price: Option<Decimal>,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub user_id: String,
}

impl OrderRequest {
    pub fn market(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::default_for(OrderType::Market),
            user_id: user_id.into(),
        }
    }

    pub fn limit(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price: Some(price),
            order_type: OrderType::Limit,
            time_in_force: TimeInForce::default_for(OrderType::Limit),
            user_id: user_id.into(),
        }
    }

    /// Amount of funds moved through the wallets for this order.
    pub fn amount(&self) -> Decimal {
        self.quantity
    }

    pub fn validate(&self) -> Result<()> {
        if self.order_id.trim().is_empty() {
            return Err(OrderflowError::Validation("order_id is empty".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(OrderflowError::Validation("user_id is empty".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return Err(OrderflowError::Validation("symbol is empty".to_string()));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(OrderflowError::Validation(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(OrderflowError::Validation(
                "limit order requires a price".to_string(),
            )),
            (_, Some(price)) if price <= Decimal::ZERO => Err(OrderflowError::Validation(
                format!("price must be positive, got {}", price),
            )),
            _ => Ok(()),
        }
    }
}

/// Fill progress reported by an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    Filled,
    PartiallyFilled,
    NotFilled,
    Cancelled,
}

impl FillStatus {
    /// No further fill updates are expected once an order reaches these.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FillStatus::Filled | FillStatus::Cancelled)
    }
}

/// Best-known outcome of a workflow, as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderOutcome {
    Filled,
    PartiallyFilled,
    NotFilled,
    Cancelled,
    Rejected,
    Pending,
    Placed,
    Compensating,
    Failed,
}

impl OrderOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderOutcome::Filled => "FILLED",
            OrderOutcome::PartiallyFilled => "PARTIALLY_FILLED",
            OrderOutcome::NotFilled => "NOT_FILLED",
            OrderOutcome::Cancelled => "CANCELLED",
            OrderOutcome::Rejected => "REJECTED",
            OrderOutcome::Pending => "PENDING",
            OrderOutcome::Placed => "PLACED",
            OrderOutcome::Compensating => "COMPENSATING",
            OrderOutcome::Failed => "FAILED",
        }
    }

    /// No further result is expected for the order
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderOutcome::Filled
                | OrderOutcome::Cancelled
                | OrderOutcome::Rejected
                | OrderOutcome::Failed
        )
    }
}

impl From<FillStatus> for OrderOutcome {
    fn from(status: FillStatus) -> Self {
        match status {
            FillStatus::Filled => OrderOutcome::Filled,
            FillStatus::PartiallyFilled => OrderOutcome::PartiallyFilled,
            FillStatus::NotFilled => OrderOutcome::NotFilled,
            FillStatus::Cancelled => OrderOutcome::Cancelled,
        }
    }
}

impl fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result delivered to the workflow caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub outcome: OrderOutcome,
    pub filled_qty: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub is_timeout: bool,
}

impl OrderResult {
    pub fn new(order_id: impl Into<String>, outcome: OrderOutcome, filled_qty: Decimal) -> Self {
        Self {
            order_id: order_id.into(),
            outcome,
            filled_qty,
            reason: None,
            is_timeout: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn timed_out(mut self) -> Self {
        self.is_timeout = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_delta() {
        assert_eq!(OrderSide::Buy.signed(dec!(5)), dec!(5));
        assert_eq!(OrderSide::Sell.signed(dec!(5)), dec!(-5));
        assert_eq!(OrderSide::Sell.opposite().signed(dec!(5)), dec!(5));
    }

    #[test]
    fn test_time_in_force_defaults() {
        let market = OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Buy, dec!(10));
        assert_eq!(market.time_in_force, TimeInForce::IOC);
        assert!(market.price.is_none());

        let limit = OrderRequest::limit("o-2", "u-1", "KXBTC", OrderSide::Sell, dec!(10), dec!(0.42));
        assert_eq!(limit.time_in_force, TimeInForce::GTC);
    }

    #[test]
    fn test_validate_rejects_bad_requests() {
        let ok = OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Buy, dec!(10));
        assert!(ok.validate().is_ok());

        let mut zero = ok.clone();
        zero.quantity = Decimal::ZERO;
        assert!(zero.validate().is_err());

        let mut no_price = ok.clone();
        no_price.order_type = OrderType::Limit;
        assert!(no_price.validate().is_err());

        let mut anonymous = ok;
        anonymous.user_id = "  ".to_string();
        assert!(anonymous.validate().is_err());
    }

    #[test]
    fn test_outcome_wire_names() {
        let json = serde_json::to_string(&OrderOutcome::PartiallyFilled).unwrap();
        assert_eq!(json, "\"PARTIALLY_FILLED\"");
        assert_eq!(OrderOutcome::from(FillStatus::NotFilled), OrderOutcome::NotFilled);
    }
}
