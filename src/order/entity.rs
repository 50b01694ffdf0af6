use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::{OrderEntityState, OrderEvent};
use crate::contracts::{GatewayCommand, GatewayReply};
use crate::coordinator::SagaCommand;
use crate::domain::{FillStatus, OrderRequest, OrderStatus};
use crate::error::{OrderflowError, Result};
use crate::persistence::{EventLog, EventMetadata};
use crate::position::PositionCommand;
use crate::runtime::{
    Entity, EntityContext, EntityRef, EntityResolver, Recipient, TimerSlot,
};

pub const ALREADY_PLACED: &str = "Order already placed";

/// Order events share the order id as correlation id with the workflow's
async fn persist(log: &mut EventLog<OrderEntityState>, event: OrderEvent) -> Result<()> {
    let metadata = EventMetadata::with_correlation(log.entity_id()).with_triggered_by("order");
    log.persist_with(event, Some(metadata)).await
}

#[derive(Debug)]
pub enum OrderCommand {
    PlaceOrder {
        request: OrderRequest,
        amount: Decimal,
        reply_to: Recipient<OrderReply>,
    },
    /// Acceptance or rejection from the gateway
    Gateway(GatewayReply),
    /// Incremental fill pushed by the exchange
    FillUpdate {
        fill_qty: Decimal,
        at: DateTime<Utc>,
    },
    /// Exchange-side cancellation
    Cancelled {
        reason: String,
    },
    FillTimeout {
        timer_id: u64,
    },
    GetOrderState {
        reply_to: Recipient<OrderEntityState>,
    },
}

/// Fill progress of an order, reported to its workflow
#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub order_id: String,
    pub status: FillStatus,
    pub filled_qty: Decimal,
    pub reason: Option<String>,
    pub is_timeout: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderReply {
    OrderPlaced { order_id: String, at: DateTime<Utc> },
    OrderRejected { order_id: String, reason: String },
    FillStatus(FillReport),
}

/// One instance per order, keyed by order id.
///
/// `reply_to` and `timer` are transient: after a restart the entity no longer
/// knows who placed it and has no timer running.
pub struct OrderEntity {
    gateway: EntityRef<GatewayCommand>,
    positions: Arc<dyn EntityResolver<PositionCommand>>,
    workflows: Arc<dyn EntityResolver<SagaCommand>>,
    fill_timeout: Duration,
    reply_to: Option<Recipient<OrderReply>>,
    timer: TimerSlot,
}

impl OrderEntity {
    pub fn new(
        gateway: EntityRef<GatewayCommand>,
        positions: Arc<dyn EntityResolver<PositionCommand>>,
        workflows: Arc<dyn EntityResolver<SagaCommand>>,
        fill_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            positions,
            workflows,
            fill_timeout,
            reply_to: None,
            timer: TimerSlot::new(),
        }
    }

    fn reply(&self, reply: OrderReply) {
        match &self.reply_to {
            Some(reply_to) => {
                reply_to.tell(reply);
            }
            None => debug!("No placement reply handle, dropping {:?}", reply),
        }
    }

    fn report(
        &self,
        state: &OrderEntityState,
        status: FillStatus,
        reason: Option<String>,
        is_timeout: bool,
    ) -> Result<()> {
        let report = FillReport {
            order_id: state.order_id.clone(),
            status,
            filled_qty: state.filled_qty,
            reason,
            is_timeout,
            at: Utc::now(),
        };
        info!(
            order_id = %report.order_id,
            status = ?report.status,
            filled_qty = %report.filled_qty,
            is_timeout,
            "Reporting fill status"
        );
        self.workflows
            .resolve(&state.order_id)?
            .tell(SagaCommand::from(OrderReply::FillStatus(report)));
        Ok(())
    }

    fn update_position(&self, state: &OrderEntityState, quantity: Decimal, release: bool) -> Result<()> {
        let side = state.side.ok_or_else(|| {
            OrderflowError::Internal(format!("order {} has no side", state.order_id))
        })?;
        let side = if release { side.opposite() } else { side };
        self.positions
            .resolve(&state.user_id)?
            .tell(PositionCommand::UpdatePosition {
                symbol: state.symbol.clone(),
                quantity,
                side,
                reply_to: None,
            });
        Ok(())
    }

    async fn place(
        &mut self,
        ctx: &EntityContext<OrderCommand>,
        log: &mut EventLog<OrderEntityState>,
        request: OrderRequest,
        amount: Decimal,
        reply_to: Recipient<OrderReply>,
    ) -> Result<()> {
        if log.state().placed {
            warn!(order_id = %ctx.entity_id(), "Duplicate PlaceOrder rejected");
            reply_to.tell(OrderReply::OrderRejected {
                order_id: ctx.entity_id().to_string(),
                reason: ALREADY_PLACED.to_string(),
            });
            return Ok(());
        }

        persist(log, OrderEvent::OrderPlaced {
            request: request.clone(),
            amount,
            at: Utc::now(),
        })
        .await?;
        self.reply_to = Some(reply_to);

        info!(
            order_id = %request.order_id,
            symbol = %request.symbol,
            side = %request.side,
            %amount,
            "Sending order to exchange"
        );
        self.gateway.tell(GatewayCommand::SendOrder {
            order_id: request.order_id.clone(),
            request,
            reply_to: ctx
                .myself()
                .adapter(|reply| Some(OrderCommand::Gateway(reply))),
        });

        self.timer
            .arm(ctx.myself(), self.fill_timeout, |timer_id| OrderCommand::FillTimeout {
                timer_id,
            });

        // Optimistic reservation; released on cancellation
        self.update_position(log.state(), amount, false)
    }

    async fn on_gateway(
        &mut self,
        log: &mut EventLog<OrderEntityState>,
        reply: GatewayReply,
    ) -> Result<()> {
        if log.state().status != OrderStatus::Placed {
            debug!(status = %log.state().status, "Ignoring gateway reply {:?}", reply);
            return Ok(());
        }

        match reply {
            GatewayReply::OrderAccepted { order_id, at } => {
                persist(log, OrderEvent::OrderAccepted { at }).await?;
                info!(%order_id, "Order accepted by exchange");
                self.reply(OrderReply::OrderPlaced { order_id, at });
            }
            GatewayReply::OrderRejected { order_id, reason } => {
                self.timer.cancel();
                persist(log, OrderEvent::OrderRejected {
                    reason: reason.clone(),
                    at: Utc::now(),
                })
                .await?;
                warn!(%order_id, %reason, "Order rejected by exchange");
                self.reply(OrderReply::OrderRejected { order_id, reason });
            }
        }
        Ok(())
    }

    async fn on_fill(
        &mut self,
        log: &mut EventLog<OrderEntityState>,
        fill_qty: Decimal,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let state = log.state();
        if !state.status.accepts_fills() {
            debug!(status = %state.status, %fill_qty, "Ignoring fill");
            return Ok(());
        }
        if fill_qty <= Decimal::ZERO {
            warn!(%fill_qty, "Ignoring non-positive fill");
            return Ok(());
        }

        let mut filled_qty = state.filled_qty + fill_qty;
        if filled_qty >= state.amount {
            if filled_qty > state.amount {
                warn!(amount = %state.amount, %filled_qty, "Overfill capped at order amount");
                filled_qty = state.amount;
            }
            self.timer.cancel();
            persist(log, OrderEvent::OrderFilled {
                fill_qty,
                filled_qty,
                at,
            })
            .await?;
            self.report(log.state(), FillStatus::Filled, None, false)
        } else {
            persist(log, OrderEvent::OrderPartiallyFilled {
                fill_qty,
                filled_qty,
                at,
            })
            .await?;
            self.report(log.state(), FillStatus::PartiallyFilled, None, false)
        }
    }

    async fn on_cancelled(
        &mut self,
        log: &mut EventLog<OrderEntityState>,
        reason: String,
    ) -> Result<()> {
        if !log.state().status.accepts_fills() {
            debug!(status = %log.state().status, "Ignoring cancellation");
            return Ok(());
        }

        self.timer.cancel();
        let filled_qty = log.state().filled_qty;
        persist(log, OrderEvent::OrderCancelled {
            reason: reason.clone(),
            filled_qty,
            at: Utc::now(),
        })
        .await?;

        let state = log.state();
        self.report(state, FillStatus::Cancelled, Some(reason), false)?;

        let remaining = state.remaining();
        if remaining > Decimal::ZERO {
            info!(order_id = %state.order_id, %remaining, "Releasing unfilled remainder");
            self.update_position(state, remaining, true)?;
        }
        Ok(())
    }

    async fn on_timeout(
        &mut self,
        log: &mut EventLog<OrderEntityState>,
        timer_id: u64,
    ) -> Result<()> {
        if !self.timer.take_if_current(timer_id) {
            debug!(timer_id, "Ignoring stale fill timer");
            return Ok(());
        }
        if log.state().status.is_terminal() {
            return Ok(());
        }

        let filled_qty = log.state().filled_qty;
        persist(log, OrderEvent::OrderTimedOut {
            filled_qty,
            at: Utc::now(),
        })
        .await?;

        let status = if filled_qty > Decimal::ZERO {
            FillStatus::PartiallyFilled
        } else {
            FillStatus::NotFilled
        };
        self.report(log.state(), status, None, true)
    }
}

#[async_trait]
impl Entity for OrderEntity {
    const ENTITY_TYPE: &'static str = "Order";

    type Command = OrderCommand;
    type State = OrderEntityState;

    async fn handle(
        &mut self,
        ctx: &EntityContext<OrderCommand>,
        log: &mut EventLog<OrderEntityState>,
        cmd: OrderCommand,
    ) -> Result<()> {
        match cmd {
            OrderCommand::PlaceOrder {
                request,
                amount,
                reply_to,
            } => self.place(ctx, log, request, amount, reply_to).await,
            OrderCommand::Gateway(reply) => self.on_gateway(log, reply).await,
            OrderCommand::FillUpdate { fill_qty, at } => self.on_fill(log, fill_qty, at).await,
            OrderCommand::Cancelled { reason } => self.on_cancelled(log, reason).await,
            OrderCommand::FillTimeout { timer_id } => self.on_timeout(log, timer_id).await,
            OrderCommand::GetOrderState { reply_to } => {
                reply_to.tell(log.state().clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use crate::persistence::{Persistence, SnapshotPolicy};
    use crate::runtime::{spawn_entity, FixedResolver, TestProbe};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    const WAIT: Duration = Duration::from_millis(500);

    struct Harness {
        order: EntityRef<OrderCommand>,
        gateway: TestProbe<GatewayCommand>,
        positions: TestProbe<PositionCommand>,
        workflow: TestProbe<SagaCommand>,
        replies: mpsc::UnboundedReceiver<OrderReply>,
    }

    impl Harness {
        fn start(fill_timeout: Duration) -> Self {
            let gateway = TestProbe::new("gateway");
            let positions = TestProbe::new("positions");
            let workflow = TestProbe::new("workflow");
            let entity = OrderEntity::new(
                gateway.entity_ref(),
                FixedResolver::new(positions.entity_ref()),
                FixedResolver::new(workflow.entity_ref()),
                fill_timeout,
            );
            let order = spawn_entity(
                "o-1",
                entity,
                Persistence::in_memory(SnapshotPolicy::disabled()),
            );
            let (_, replies) = mpsc::unbounded_channel();
            Self {
                order,
                gateway,
                positions,
                workflow,
                replies,
            }
        }

        /// Place the order and let the gateway accept it
        async fn place_and_accept(&mut self, amount: Decimal) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.replies = rx;
            self.order.tell(OrderCommand::PlaceOrder {
                request: OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Buy, amount),
                amount,
                reply_to: Recipient::from_channel(tx),
            });

            let GatewayCommand::SendOrder { reply_to, .. } =
                self.gateway.expect_message(WAIT).await
            else {
                panic!("expected SendOrder");
            };
            match self.positions.expect_message(WAIT).await {
                PositionCommand::UpdatePosition { quantity, side, .. } => {
                    assert_eq!(quantity, amount);
                    assert_eq!(side, OrderSide::Buy);
                }
                other => panic!("unexpected {:?}", other),
            }

            reply_to.tell(GatewayReply::OrderAccepted {
                order_id: "o-1".to_string(),
                at: Utc::now(),
            });
            let placed = self.replies.recv().await.unwrap();
            assert!(matches!(placed, OrderReply::OrderPlaced { .. }));
        }

        async fn expect_report(&mut self) -> FillReport {
            match self.workflow.expect_message(WAIT).await {
                SagaCommand::OrderFillStatusReceived(report) => report,
                other => panic!("unexpected {:?}", other),
            }
        }

        fn fill(&self, qty: Decimal) {
            self.order.tell(OrderCommand::FillUpdate {
                fill_qty: qty,
                at: Utc::now(),
            });
        }

        async fn state(&self) -> OrderEntityState {
            self.order
                .ask(|reply_to| OrderCommand::GetOrderState { reply_to }, WAIT)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_partial_then_full_fill_reports_filled_once() {
        let mut h = Harness::start(Duration::from_millis(200));
        h.place_and_accept(dec!(100)).await;

        h.fill(dec!(30));
        let partial = h.expect_report().await;
        assert_eq!(partial.status, FillStatus::PartiallyFilled);
        assert_eq!(partial.filled_qty, dec!(30));

        h.fill(dec!(70));
        let filled = h.expect_report().await;
        assert_eq!(filled.status, FillStatus::Filled);
        assert_eq!(filled.filled_qty, dec!(100));

        // Timer was cancelled with the final fill
        h.workflow.expect_no_message(Duration::from_millis(350)).await;
        assert_eq!(h.state().await.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_timeout_without_fills_reports_not_filled() {
        let mut h = Harness::start(Duration::from_millis(50));
        h.place_and_accept(dec!(10)).await;

        let report = h.expect_report().await;
        assert_eq!(report.status, FillStatus::NotFilled);
        assert_eq!(report.filled_qty, Decimal::ZERO);
        assert!(report.is_timeout);

        // Only one timer per order
        h.workflow.expect_no_message(Duration::from_millis(150)).await;
        assert!(h.positions.try_next().is_none());
    }

    #[tokio::test]
    async fn test_timeout_after_partial_fill() {
        let mut h = Harness::start(Duration::from_millis(80));
        h.place_and_accept(dec!(10)).await;
        h.fill(dec!(4));
        assert_eq!(h.expect_report().await.status, FillStatus::PartiallyFilled);

        let report = h.expect_report().await;
        assert_eq!(report.status, FillStatus::PartiallyFilled);
        assert_eq!(report.filled_qty, dec!(4));
        assert!(report.is_timeout);
        assert_eq!(h.state().await.status, OrderStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_releases_remainder_on_opposite_side() {
        let mut h = Harness::start(Duration::from_secs(5));
        h.place_and_accept(dec!(100)).await;
        h.fill(dec!(40));
        h.expect_report().await;

        h.order.tell(OrderCommand::Cancelled {
            reason: "user cancelled".to_string(),
        });
        let report = h.expect_report().await;
        assert_eq!(report.status, FillStatus::Cancelled);
        assert_eq!(report.filled_qty, dec!(40));

        match h.positions.expect_message(WAIT).await {
            PositionCommand::UpdatePosition { quantity, side, .. } => {
                assert_eq!(quantity, dec!(60));
                assert_eq!(side, OrderSide::Sell);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Fills after cancellation are ignored
        h.fill(dec!(10));
        h.workflow.expect_no_message(Duration::from_millis(100)).await;
        assert_eq!(h.state().await.filled_qty, dec!(40));
    }

    #[tokio::test]
    async fn test_duplicate_place_is_rejected_without_side_effects() {
        let mut h = Harness::start(Duration::from_secs(5));
        h.place_and_accept(dec!(5)).await;

        let reply = h
            .order
            .ask(
                |reply_to| OrderCommand::PlaceOrder {
                    request: OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Buy, dec!(5)),
                    amount: dec!(5),
                    reply_to,
                },
                WAIT,
            )
            .await
            .unwrap();
        assert_eq!(
            reply,
            OrderReply::OrderRejected {
                order_id: "o-1".to_string(),
                reason: ALREADY_PLACED.to_string()
            }
        );
        h.gateway.expect_no_message(Duration::from_millis(100)).await;
        assert!(h.positions.try_next().is_none());
    }

    #[tokio::test]
    async fn test_gateway_rejection_replies_and_stops_timer() {
        let mut h = Harness::start(Duration::from_millis(60));
        let (tx, mut replies) = mpsc::unbounded_channel();
        h.order.tell(OrderCommand::PlaceOrder {
            request: OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Sell, dec!(5)),
            amount: dec!(5),
            reply_to: Recipient::from_channel(tx),
        });
        let GatewayCommand::SendOrder { reply_to, .. } = h.gateway.expect_message(WAIT).await else {
            panic!("expected SendOrder");
        };
        reply_to.tell(GatewayReply::OrderRejected {
            order_id: "o-1".to_string(),
            reason: "market closed".to_string(),
        });

        assert_eq!(
            replies.recv().await.unwrap(),
            OrderReply::OrderRejected {
                order_id: "o-1".to_string(),
                reason: "market closed".to_string()
            }
        );
        h.workflow.expect_no_message(Duration::from_millis(150)).await;
        assert_eq!(h.state().await.status, OrderStatus::Rejected);
    }
}
