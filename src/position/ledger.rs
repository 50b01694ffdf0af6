use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::state::{PositionEvent, PositionState};
use crate::domain::OrderSide;
use crate::error::Result;
use crate::persistence::EventLog;
use crate::runtime::{Entity, EntityContext, Recipient};

#[derive(Debug)]
pub enum PositionCommand {
    /// Add a signed delta. Acknowledged only when `reply_to` is set.
    UpdatePosition {
        symbol: String,
        quantity: Decimal,
        side: OrderSide,
        reply_to: Option<Recipient<PositionReply>>,
    },
    GetPosition {
        symbol: String,
        reply_to: Recipient<PositionReply>,
    },
    GetPositions {
        reply_to: Recipient<PositionReply>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionReply {
    Ack {
        symbol: String,
        net_position: Decimal,
    },
    PositionResult {
        symbol: String,
        net_position: Decimal,
    },
    Positions {
        positions: BTreeMap<String, Decimal>,
    },
}

/// One instance per user, keyed by user id
#[derive(Default)]
pub struct PositionLedger;

impl PositionLedger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Entity for PositionLedger {
    const ENTITY_TYPE: &'static str = "PositionLedger";

    type Command = PositionCommand;
    type State = PositionState;

    async fn handle(
        &mut self,
        ctx: &EntityContext<PositionCommand>,
        log: &mut EventLog<PositionState>,
        cmd: PositionCommand,
    ) -> Result<()> {
        match cmd {
            PositionCommand::UpdatePosition {
                symbol,
                quantity,
                side,
                reply_to,
            } => {
                if quantity <= Decimal::ZERO {
                    warn!(user_id = %ctx.entity_id(), %symbol, %quantity, "Ignoring non-positive position update");
                    return Ok(());
                }

                log.persist(PositionEvent::PositionUpdated {
                    symbol: symbol.clone(),
                    quantity,
                    side,
                    at: Utc::now(),
                })
                .await?;

                let net_position = log.state().net_position(&symbol);
                debug!(user_id = %ctx.entity_id(), %symbol, %side, %quantity, %net_position, "Position updated");

                if let Some(reply_to) = reply_to {
                    reply_to.tell(PositionReply::Ack {
                        symbol,
                        net_position,
                    });
                }
            }
            PositionCommand::GetPosition { symbol, reply_to } => {
                let net_position = log.state().net_position(&symbol);
                reply_to.tell(PositionReply::PositionResult {
                    symbol,
                    net_position,
                });
            }
            PositionCommand::GetPositions { reply_to } => {
                reply_to.tell(PositionReply::Positions {
                    positions: log.state().positions.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{Persistence, SnapshotPolicy};
    use crate::runtime::spawn_entity;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_update_ack_and_query() {
        let ledger = spawn_entity(
            "user-1",
            PositionLedger::new(),
            Persistence::in_memory(SnapshotPolicy::disabled()),
        );

        ledger.tell(PositionCommand::UpdatePosition {
            symbol: "KXBTC".to_string(),
            quantity: dec!(10),
            side: OrderSide::Buy,
            reply_to: None,
        });

        let ack = ledger
            .ask(
                |reply_to| PositionCommand::UpdatePosition {
                    symbol: "KXBTC".to_string(),
                    quantity: dec!(3),
                    side: OrderSide::Sell,
                    reply_to: Some(reply_to),
                },
                WAIT,
            )
            .await
            .unwrap();
        assert_eq!(
            ack,
            PositionReply::Ack {
                symbol: "KXBTC".to_string(),
                net_position: dec!(7)
            }
        );

        let result = ledger
            .ask(
                |reply_to| PositionCommand::GetPosition {
                    symbol: "KXBTC".to_string(),
                    reply_to,
                },
                WAIT,
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            PositionReply::PositionResult {
                symbol: "KXBTC".to_string(),
                net_position: dec!(7)
            }
        );
    }

    #[tokio::test]
    async fn test_positions_survive_restart() {
        let persistence = Persistence::in_memory(SnapshotPolicy { every: 2 });
        let ledger = spawn_entity("user-1", PositionLedger::new(), persistence.clone());
        for (symbol, qty) in [("A", dec!(1)), ("B", dec!(2)), ("A", dec!(4))] {
            ledger.tell(PositionCommand::UpdatePosition {
                symbol: symbol.to_string(),
                quantity: qty,
                side: OrderSide::Buy,
                reply_to: None,
            });
        }
        let _ = ledger
            .ask(|reply_to| PositionCommand::GetPositions { reply_to }, WAIT)
            .await
            .unwrap();
        ledger.stop();

        let revived = spawn_entity("user-1", PositionLedger::new(), persistence);
        let reply = revived
            .ask(|reply_to| PositionCommand::GetPositions { reply_to }, WAIT)
            .await
            .unwrap();
        let PositionReply::Positions { positions } = reply else {
            panic!("unexpected reply {:?}", reply);
        };
        assert_eq!(positions.get("A"), Some(&dec!(5)));
        assert_eq!(positions.get("B"), Some(&dec!(2)));
    }
}
