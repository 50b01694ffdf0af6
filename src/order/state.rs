use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{OrderRequest, OrderSide, OrderStatus};
use crate::persistence::{DomainEvent, EventSourced};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    OrderPlaced {
        request: OrderRequest,
        amount: Decimal,
        at: DateTime<Utc>,
    },
    OrderAccepted {
        at: DateTime<Utc>,
    },
    OrderRejected {
        reason: String,
        at: DateTime<Utc>,
    },
    OrderPartiallyFilled {
        fill_qty: Decimal,
        filled_qty: Decimal,
        at: DateTime<Utc>,
    },
    OrderFilled {
        fill_qty: Decimal,
        filled_qty: Decimal,
        at: DateTime<Utc>,
    },
    OrderCancelled {
        reason: String,
        filled_qty: Decimal,
        at: DateTime<Utc>,
    },
    OrderTimedOut {
        filled_qty: Decimal,
        at: DateTime<Utc>,
    },
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced { .. } => "OrderPlaced",
            OrderEvent::OrderAccepted { .. } => "OrderAccepted",
            OrderEvent::OrderRejected { .. } => "OrderRejected",
            OrderEvent::OrderPartiallyFilled { .. } => "OrderPartiallyFilled",
            OrderEvent::OrderFilled { .. } => "OrderFilled",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled",
            OrderEvent::OrderTimedOut { .. } => "OrderTimedOut",
        }
    }
}

/// Durable state of one order on the exchange
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderEntityState {
    pub order_id: String,
    pub user_id: String,
    pub symbol: String,
    pub amount: Decimal,
    pub side: Option<OrderSide>,
    pub placed: bool,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    /// Set once a fill timeout has been reported
    pub timed_out: bool,
    pub reason: Option<String>,
    pub request: Option<OrderRequest>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl OrderEntityState {
    pub fn remaining(&self) -> Decimal {
        (self.amount - self.filled_qty).max(Decimal::ZERO)
    }
}

impl EventSourced for OrderEntityState {
    type Event = OrderEvent;

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderPlaced {
                request,
                amount,
                at,
            } => {
                self.order_id = request.order_id.clone();
                self.user_id = request.user_id.clone();
                self.symbol = request.symbol.clone();
                self.side = Some(request.side);
                self.amount = *amount;
                self.placed = true;
                self.status = OrderStatus::Placed;
                self.request = Some(request.clone());
                self.last_updated = Some(*at);
            }
            OrderEvent::OrderAccepted { at } => {
                self.status = OrderStatus::Accepted;
                self.last_updated = Some(*at);
            }
            OrderEvent::OrderRejected { reason, at } => {
                self.status = OrderStatus::Rejected;
                self.reason = Some(reason.clone());
                self.last_updated = Some(*at);
            }
            OrderEvent::OrderPartiallyFilled { filled_qty, at, .. } => {
                self.status = OrderStatus::PartiallyFilled;
                self.filled_qty = *filled_qty;
                self.last_updated = Some(*at);
            }
            OrderEvent::OrderFilled { filled_qty, at, .. } => {
                self.status = OrderStatus::Filled;
                self.filled_qty = *filled_qty;
                self.last_updated = Some(*at);
            }
            OrderEvent::OrderCancelled {
                reason,
                filled_qty,
                at,
            } => {
                self.status = OrderStatus::Cancelled;
                self.filled_qty = *filled_qty;
                self.reason = Some(reason.clone());
                self.last_updated = Some(*at);
            }
            OrderEvent::OrderTimedOut { at, .. } => {
                // Still waiting for acceptance keeps the order in PLACED
                if self.status.can_transition_to(OrderStatus::TimedOut) {
                    self.status = OrderStatus::TimedOut;
                }
                self.timed_out = true;
                self.last_updated = Some(*at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn placed() -> OrderEvent {
        OrderEvent::OrderPlaced {
            request: OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Buy, dec!(100)),
            amount: dec!(100),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_replay_fill_sequence() {
        let now = Utc::now();
        let events = vec![
            placed(),
            OrderEvent::OrderAccepted { at: now },
            OrderEvent::OrderPartiallyFilled {
                fill_qty: dec!(30),
                filled_qty: dec!(30),
                at: now,
            },
            OrderEvent::OrderTimedOut {
                filled_qty: dec!(30),
                at: now,
            },
            OrderEvent::OrderFilled {
                fill_qty: dec!(70),
                filled_qty: dec!(100),
                at: now,
            },
        ];
        let state = OrderEntityState::replay(&events);

        assert!(state.placed);
        assert!(state.timed_out);
        assert_eq!(state.status, OrderStatus::Filled);
        assert_eq!(state.filled_qty, dec!(100));
        assert_eq!(state.remaining(), Decimal::ZERO);
    }

    #[test]
    fn test_timeout_before_acceptance_keeps_placed() {
        let events = vec![
            placed(),
            OrderEvent::OrderTimedOut {
                filled_qty: Decimal::ZERO,
                at: Utc::now(),
            },
        ];
        let state = OrderEntityState::replay(&events);
        assert_eq!(state.status, OrderStatus::Placed);
        assert!(state.timed_out);
    }

    #[test]
    fn test_event_payload_is_tagged() {
        let json = serde_json::to_value(OrderEvent::OrderAccepted { at: Utc::now() }).unwrap();
        assert_eq!(json["type"], "OrderAccepted");
    }
}
