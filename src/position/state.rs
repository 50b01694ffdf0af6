use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::OrderSide;
use crate::persistence::{DomainEvent, EventSourced};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PositionEvent {
    PositionUpdated {
        symbol: String,
        quantity: Decimal,
        side: OrderSide,
        at: DateTime<Utc>,
    },
}

impl DomainEvent for PositionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PositionEvent::PositionUpdated { .. } => "PositionUpdated",
        }
    }
}

/// Net signed quantity per symbol for one user. Buys add, sells subtract.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PositionState {
    pub positions: BTreeMap<String, Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl PositionState {
    pub fn net_position(&self, symbol: &str) -> Decimal {
        self.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }
}

impl EventSourced for PositionState {
    type Event = PositionEvent;

    fn apply(&mut self, event: &PositionEvent) {
        match event {
            PositionEvent::PositionUpdated {
                symbol,
                quantity,
                side,
                at,
            } => {
                *self.positions.entry(symbol.clone()).or_insert(Decimal::ZERO) +=
                    side.signed(*quantity);
                self.last_updated = Some(*at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn update(symbol: &str, quantity: Decimal, side: OrderSide) -> PositionEvent {
        PositionEvent::PositionUpdated {
            symbol: symbol.to_string(),
            quantity,
            side,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_signed_accumulation() {
        let events = vec![
            update("KXBTC", dec!(10), OrderSide::Buy),
            update("KXBTC", dec!(4), OrderSide::Sell),
            update("KXETH", dec!(3), OrderSide::Sell),
        ];
        let state = PositionState::replay(&events);

        assert_eq!(state.net_position("KXBTC"), dec!(6));
        assert_eq!(state.net_position("KXETH"), dec!(-3));
        assert_eq!(state.net_position("KXSOL"), Decimal::ZERO);
    }
}
