//! Saga coordinator: drives one order workflow end to end
//!
//! Forward path: query position → debit source wallet → debit intermediary
//! (exchange) wallet → credit destination → place order. Each step issues
//! exactly one command and waits for its reply; a failure walks back through
//! the steps already committed, intermediary first, then source.
//!
//! Every state change is persisted before anything leaves the entity. The
//! caller's reply handle is transient: after a restart the workflow keeps its
//! state but can only be observed through `GetStatus`.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::command::{SagaCommand, WorkflowReply};
use super::state::{FailureKind, SagaEvent, SagaState};
use crate::contracts::WalletCommand;
use crate::domain::{FillStatus, OrderOutcome, OrderRequest, OrderResult, SagaStep};
use crate::error::{OrderflowError, Result};
use crate::order::{FillReport, OrderCommand, ALREADY_PLACED};
use crate::persistence::{EventLog, EventMetadata};
use crate::position::PositionCommand;
use crate::runtime::{Entity, EntityContext, EntityRef, EntityResolver, Recipient};

pub const ALREADY_STARTED: &str = "Already started";

/// Correlation id for the wallet command issued on entering `step`
pub fn correlation_id(order_id: &str, step: SagaStep) -> String {
    format!("{}:{}", order_id, step.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalletOp {
    Debit,
    Credit,
}

/// Outcome of a wallet reply, already matched against the current step
enum WalletOutcome {
    Completed,
    Failed(String),
}

pub struct SagaCoordinator {
    source_wallet: EntityRef<WalletCommand>,
    exchange_wallet: EntityRef<WalletCommand>,
    orders: Arc<dyn EntityResolver<OrderCommand>>,
    positions: Arc<dyn EntityResolver<PositionCommand>>,
    reply_to: Option<Recipient<WorkflowReply>>,
}

impl SagaCoordinator {
    pub fn new(
        source_wallet: EntityRef<WalletCommand>,
        exchange_wallet: EntityRef<WalletCommand>,
        orders: Arc<dyn EntityResolver<OrderCommand>>,
        positions: Arc<dyn EntityResolver<PositionCommand>>,
    ) -> Self {
        Self {
            source_wallet,
            exchange_wallet,
            orders,
            positions,
            reply_to: None,
        }
    }

    fn notify(&self, reply: WorkflowReply) {
        match &self.reply_to {
            Some(reply_to) => {
                if !reply_to.tell(reply) {
                    debug!("Caller no longer listening");
                }
            }
            None => debug!("No caller handle (recovered workflow), dropping {:?}", reply),
        }
    }

    fn notify_failed(&self, order_id: &str, reason: String) {
        self.notify(WorkflowReply::WorkflowFailed {
            order_id: order_id.to_string(),
            reason,
        });
    }

    async fn persist(
        &self,
        log: &mut EventLog<SagaState>,
        event: SagaEvent,
    ) -> Result<()> {
        let from = log.state().step;
        if let Some(to) = event.target_step() {
            if !from.can_transition_to(to) {
                return Err(OrderflowError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }

        let metadata = EventMetadata::with_correlation(log.entity_id()).with_triggered_by("saga");
        log.persist_with(event, Some(metadata)).await?;

        let to = log.state().step;
        if to != from {
            info!(order_id = %log.entity_id(), from = %from, to = %to, "Workflow step");
        }
        Ok(())
    }

    /// Issue the single command that belongs to the step just entered
    fn issue_step_command(
        &self,
        ctx: &EntityContext<SagaCommand>,
        state: &SagaState,
    ) -> Result<()> {
        let request = state
            .request
            .as_ref()
            .ok_or_else(|| OrderflowError::Internal("workflow has no request".to_string()))?;
        let order_id = ctx.entity_id();
        let step = state.step;

        match step {
            SagaStep::QueryingPosition => {
                self.positions
                    .resolve(&request.user_id)?
                    .tell(PositionCommand::GetPosition {
                        symbol: request.symbol.clone(),
                        reply_to: ctx.myself().adapter(SagaCommand::from_position_reply),
                    });
            }
            SagaStep::DebitingSource => {
                self.wallet_command(ctx, &self.source_wallet, WalletOp::Debit, request, step);
            }
            SagaStep::DebitingIntermediary | SagaStep::CompensatingIntermediary => {
                self.wallet_command(ctx, &self.exchange_wallet, WalletOp::Debit, request, step);
            }
            SagaStep::CreditingDestination => {
                self.wallet_command(ctx, &self.exchange_wallet, WalletOp::Credit, request, step);
            }
            SagaStep::CompensatingSource => {
                self.wallet_command(ctx, &self.source_wallet, WalletOp::Credit, request, step);
            }
            SagaStep::PlacingOrder => {
                self.orders
                    .resolve(order_id)?
                    .tell(OrderCommand::PlaceOrder {
                        request: request.clone(),
                        amount: request.amount(),
                        reply_to: ctx.myself().adapter(|reply| Some(SagaCommand::from(reply))),
                    });
            }
            SagaStep::Init | SagaStep::Completed | SagaStep::Failed => {}
        }
        Ok(())
    }

    fn wallet_command(
        &self,
        ctx: &EntityContext<SagaCommand>,
        wallet: &EntityRef<WalletCommand>,
        op: WalletOp,
        request: &OrderRequest,
        step: SagaStep,
    ) {
        let amount = request.amount();
        let user_id = request.user_id.clone();
        let correlation_id = correlation_id(ctx.entity_id(), step);
        let reply_to = ctx.myself().adapter(|reply| Some(SagaCommand::from(reply)));

        debug!(wallet = %wallet.entity_id(), ?op, %amount, %correlation_id, "Wallet command");
        let command = match op {
            WalletOp::Debit => WalletCommand::DebitFunds {
                amount,
                user_id,
                correlation_id,
                reply_to,
            },
            WalletOp::Credit => WalletCommand::CreditFunds {
                amount,
                user_id,
                correlation_id,
                reply_to,
            },
        };
        wallet.tell(command);
    }

    /// Persist `event` and issue the next step's command
    async fn advance(
        &mut self,
        ctx: &EntityContext<SagaCommand>,
        log: &mut EventLog<SagaState>,
        event: SagaEvent,
    ) -> Result<()> {
        self.persist(log, event).await?;
        self.issue_step_command(ctx, log.state())
    }

    async fn start(
        &mut self,
        ctx: &EntityContext<SagaCommand>,
        log: &mut EventLog<SagaState>,
        request: OrderRequest,
        reply_to: Recipient<WorkflowReply>,
    ) -> Result<()> {
        let order_id = ctx.entity_id().to_string();
        let reject = |reason: String| {
            reply_to.tell(WorkflowReply::WorkflowFailed {
                order_id: order_id.clone(),
                reason,
            });
        };

        if log.state().step != SagaStep::Init {
            warn!(%order_id, step = %log.state().step, "Duplicate StartWorkflow");
            reject(ALREADY_STARTED.to_string());
            return Ok(());
        }
        if let Err(e) = request.validate() {
            reject(format!("Invalid order request: {}", e));
            return Ok(());
        }
        if request.order_id != order_id {
            reject(format!(
                "Invalid order request: order_id {} routed to workflow {}",
                request.order_id, order_id
            ));
            return Ok(());
        }
        // Nothing is persisted if the first collaborator cannot be reached
        if let Err(e) = self.positions.resolve(&request.user_id) {
            reject(format!("Position ledger unavailable: {}", e));
            return Ok(());
        }

        info!(
            %order_id,
            user_id = %request.user_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            "Starting workflow"
        );
        self.persist(
            log,
            SagaEvent::WorkflowStarted {
                request,
                at: Utc::now(),
            },
        )
        .await?;

        self.reply_to = Some(reply_to);
        self.notify(WorkflowReply::WorkflowStarted {
            order_id: order_id.clone(),
        });
        self.issue_step_command(ctx, log.state())
    }

    async fn on_position(
        &mut self,
        ctx: &EntityContext<SagaCommand>,
        log: &mut EventLog<SagaState>,
        symbol: String,
        net_position: Decimal,
    ) -> Result<()> {
        if log.state().step != SagaStep::QueryingPosition {
            debug!(step = %log.state().step, "Ignoring stale position result");
            return Ok(());
        }
        debug!(%symbol, %net_position, "Position received");
        self.advance(
            ctx,
            log,
            SagaEvent::PositionQueried {
                net_position,
                at: Utc::now(),
            },
        )
        .await
    }

    async fn on_wallet(
        &mut self,
        ctx: &EntityContext<SagaCommand>,
        log: &mut EventLog<SagaState>,
        op: WalletOp,
        reply_correlation: String,
        outcome: WalletOutcome,
    ) -> Result<()> {
        let step = log.state().step;
        let order_id = ctx.entity_id().to_string();

        let expected_op = match step {
            SagaStep::DebitingSource
            | SagaStep::DebitingIntermediary
            | SagaStep::CompensatingIntermediary => Some(WalletOp::Debit),
            SagaStep::CreditingDestination | SagaStep::CompensatingSource => {
                Some(WalletOp::Credit)
            }
            _ => None,
        };
        if expected_op != Some(op) || reply_correlation != correlation_id(&order_id, step) {
            debug!(%step, ?op, correlation_id = %reply_correlation, "Ignoring stale wallet reply");
            return Ok(());
        }

        let now = Utc::now();
        match (step, outcome) {
            (SagaStep::DebitingSource, WalletOutcome::Completed) => {
                self.advance(ctx, log, SagaEvent::SourceDebited { at: now }).await
            }
            (SagaStep::DebitingSource, WalletOutcome::Failed(reason)) => {
                // Nothing moved yet, nothing to compensate
                let reason = format!("Source debit failed: {}", reason);
                warn!(%order_id, %reason, "Workflow failed");
                self.persist(
                    log,
                    SagaEvent::WorkflowFailed {
                        kind: FailureKind::Service,
                        reason: reason.clone(),
                        at: now,
                    },
                )
                .await?;
                self.notify_failed(&order_id, reason);
                Ok(())
            }
            (SagaStep::DebitingIntermediary, WalletOutcome::Completed) => {
                self.advance(ctx, log, SagaEvent::IntermediaryDebited { at: now })
                    .await
            }
            (SagaStep::DebitingIntermediary, WalletOutcome::Failed(reason)) => {
                let reason = format!("Intermediary debit failed: {}", reason);
                warn!(%order_id, %reason, "Compensating source wallet");
                self.advance(
                    ctx,
                    log,
                    SagaEvent::CompensationStarted {
                        next: SagaStep::CompensatingSource,
                        reason,
                        at: now,
                    },
                )
                .await
            }
            (SagaStep::CreditingDestination, WalletOutcome::Completed) => {
                self.advance(ctx, log, SagaEvent::DestinationCredited { at: now })
                    .await
            }
            (SagaStep::CreditingDestination, WalletOutcome::Failed(reason)) => {
                let reason = format!("Destination credit failed: {}", reason);
                warn!(%order_id, %reason, "Compensating intermediary wallet");
                self.advance(
                    ctx,
                    log,
                    SagaEvent::CompensationStarted {
                        next: SagaStep::CompensatingIntermediary,
                        reason,
                        at: now,
                    },
                )
                .await
            }
            (SagaStep::CompensatingIntermediary, WalletOutcome::Completed) => {
                self.advance(ctx, log, SagaEvent::IntermediaryCompensated { at: now })
                    .await
            }
            (SagaStep::CompensatingSource, WalletOutcome::Completed) => {
                self.persist(log, SagaEvent::SourceCompensated { at: now })
                    .await?;
                let state = log.state();
                info!(%order_id, "Compensation complete");
                // A rejected order already told the caller
                if state.rejection_reason.is_none() {
                    let reason = state
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "Workflow failed".to_string());
                    self.notify_failed(&order_id, reason);
                }
                Ok(())
            }
            (
                SagaStep::CompensatingIntermediary | SagaStep::CompensatingSource,
                WalletOutcome::Failed(reason),
            ) => {
                error!(%order_id, %step, %reason, "Compensation failed, manual reconciliation required");
                self.persist(
                    log,
                    SagaEvent::WorkflowFailed {
                        kind: FailureKind::Compensation,
                        reason: reason.clone(),
                        at: now,
                    },
                )
                .await?;
                self.notify_failed(&order_id, format!("Compensation failed: {}", reason));
                Ok(())
            }
            (step, _) => {
                debug!(%step, "No wallet transition");
                Ok(())
            }
        }
    }

    async fn on_order_placed(
        &mut self,
        log: &mut EventLog<SagaState>,
        order_id: String,
    ) -> Result<()> {
        if log.state().step != SagaStep::PlacingOrder {
            debug!(step = %log.state().step, "Ignoring OrderPlaced");
            return Ok(());
        }
        self.persist(log, SagaEvent::OrderPlaced { at: Utc::now() })
            .await?;
        info!(%order_id, "Order live on exchange");
        Ok(())
    }

    async fn on_order_rejected(
        &mut self,
        ctx: &EntityContext<SagaCommand>,
        log: &mut EventLog<SagaState>,
        order_id: String,
        reason: String,
    ) -> Result<()> {
        if reason == ALREADY_PLACED {
            // A duplicate placement attempt, the original order stands
            warn!(%order_id, "Order entity reports order already placed");
            return Ok(());
        }
        if log.state().step != SagaStep::PlacingOrder {
            debug!(step = %log.state().step, "Ignoring order rejection");
            return Ok(());
        }

        warn!(%order_id, %reason, "Order rejected by exchange, compensating");
        self.persist(
            log,
            SagaEvent::OrderRejected {
                reason: reason.clone(),
                at: Utc::now(),
            },
        )
        .await?;
        self.notify(WorkflowReply::OrderResult(
            OrderResult::new(order_id, OrderOutcome::Rejected, Decimal::ZERO).with_reason(reason),
        ));
        self.issue_step_command(ctx, log.state())
    }

    async fn on_fill_status(
        &mut self,
        log: &mut EventLog<SagaState>,
        report: FillReport,
    ) -> Result<()> {
        let state = log.state();
        if !matches!(state.step, SagaStep::PlacingOrder | SagaStep::Completed) {
            debug!(step = %state.step, "Ignoring fill status");
            return Ok(());
        }
        let ignored = if state.fill_status.map(|s| s.is_terminal()).unwrap_or(false) {
            Some("after terminal status")
        } else if report.filled_qty < state.filled_qty {
            Some("filled quantity went backwards")
        } else if state.fill_status == Some(report.status)
            && state.filled_qty == report.filled_qty
            && state.is_timeout == report.is_timeout
        {
            Some("duplicate")
        } else {
            None
        };
        if let Some(cause) = ignored {
            debug!(
                status = ?report.status,
                reported = %report.filled_qty,
                known = %state.filled_qty,
                cause,
                "Fill status ignored"
            );
            return self
                .persist(
                    log,
                    SagaEvent::FillReportIgnored {
                        status: report.status,
                        filled_qty: report.filled_qty,
                        is_timeout: report.is_timeout,
                        cause: cause.to_string(),
                        at: report.at,
                    },
                )
                .await;
        }

        let amount = state.amount();
        self.persist(
            log,
            SagaEvent::FillStatusRecorded {
                status: report.status,
                filled_qty: report.filled_qty,
                is_timeout: report.is_timeout,
                reason: report.reason.clone(),
                at: report.at,
            },
        )
        .await?;

        if report.status == FillStatus::Cancelled && report.filled_qty < amount {
            let remainder = amount - report.filled_qty;
            self.persist(
                log,
                SagaEvent::ManualInterventionRequired {
                    remainder,
                    at: Utc::now(),
                },
            )
            .await?;
            warn!(
                order_id = %report.order_id,
                %remainder,
                "Order cancelled with unfilled remainder, manual intervention required"
            );
        }

        if report.status.is_terminal() || report.is_timeout {
            let mut result = OrderResult::new(
                report.order_id.clone(),
                report.status.into(),
                report.filled_qty,
            );
            result.reason = report.reason;
            result.is_timeout = report.is_timeout;
            self.notify(WorkflowReply::OrderResult(result));
        }
        Ok(())
    }
}

#[async_trait]
impl Entity for SagaCoordinator {
    const ENTITY_TYPE: &'static str = "OrderWorkflow";

    type Command = SagaCommand;
    type State = SagaState;

    async fn handle(
        &mut self,
        ctx: &EntityContext<SagaCommand>,
        log: &mut EventLog<SagaState>,
        cmd: SagaCommand,
    ) -> Result<()> {
        match cmd {
            SagaCommand::StartWorkflow { request, reply_to } => {
                self.start(ctx, log, request, reply_to).await
            }
            SagaCommand::PositionReceived {
                symbol,
                net_position,
            } => self.on_position(ctx, log, symbol, net_position).await,
            SagaCommand::DebitCompleted { correlation_id, .. } => {
                self.on_wallet(ctx, log, WalletOp::Debit, correlation_id, WalletOutcome::Completed)
                    .await
            }
            SagaCommand::DebitFailed {
                correlation_id,
                reason,
            } => {
                self.on_wallet(
                    ctx,
                    log,
                    WalletOp::Debit,
                    correlation_id,
                    WalletOutcome::Failed(reason),
                )
                .await
            }
            SagaCommand::CreditCompleted { correlation_id, .. } => {
                self.on_wallet(ctx, log, WalletOp::Credit, correlation_id, WalletOutcome::Completed)
                    .await
            }
            SagaCommand::CreditFailed {
                correlation_id,
                reason,
            } => {
                self.on_wallet(
                    ctx,
                    log,
                    WalletOp::Credit,
                    correlation_id,
                    WalletOutcome::Failed(reason),
                )
                .await
            }
            SagaCommand::OrderPlaced { order_id, .. } => self.on_order_placed(log, order_id).await,
            SagaCommand::OrderPlacementFailed { order_id, reason } => {
                self.on_order_rejected(ctx, log, order_id, reason).await
            }
            SagaCommand::OrderFillStatusReceived(report) => self.on_fill_status(log, report).await,
            SagaCommand::GetStatus { reply_to } => {
                reply_to.tell(log.state().status(ctx.entity_id()));
                Ok(())
            }
            SagaCommand::GetState { reply_to } => {
                reply_to.tell(log.state().clone());
                Ok(())
            }
        }
    }
}
