//! Workflow state and its events

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{FillStatus, OrderOutcome, OrderRequest, OrderResult, SagaStep};
use crate::persistence::{DomainEvent, EventSourced};

/// Why a workflow ended in FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// A forward step failed; completed steps were reversed
    Service,
    /// Reversing a step failed; funds need manual reconciliation
    Compensation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailure {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SagaEvent {
    WorkflowStarted {
        request: OrderRequest,
        at: DateTime<Utc>,
    },
    PositionQueried {
        net_position: Decimal,
        at: DateTime<Utc>,
    },
    SourceDebited {
        at: DateTime<Utc>,
    },
    IntermediaryDebited {
        at: DateTime<Utc>,
    },
    DestinationCredited {
        at: DateTime<Utc>,
    },
    OrderPlaced {
        at: DateTime<Utc>,
    },
    OrderRejected {
        reason: String,
        at: DateTime<Utc>,
    },
    /// A forward step failed; `next` is the first compensation step
    CompensationStarted {
        next: SagaStep,
        reason: String,
        at: DateTime<Utc>,
    },
    IntermediaryCompensated {
        at: DateTime<Utc>,
    },
    SourceCompensated {
        at: DateTime<Utc>,
    },
    WorkflowFailed {
        kind: FailureKind,
        reason: String,
        at: DateTime<Utc>,
    },
    FillStatusRecorded {
        status: FillStatus,
        filled_qty: Decimal,
        is_timeout: bool,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    /// A fill report that told nothing new; kept for the audit trail
    FillReportIgnored {
        status: FillStatus,
        filled_qty: Decimal,
        is_timeout: bool,
        cause: String,
        at: DateTime<Utc>,
    },
    /// Cancelled with an unfilled remainder that nothing compensates
    ManualInterventionRequired {
        remainder: Decimal,
        at: DateTime<Utc>,
    },
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::WorkflowStarted { .. } => "WorkflowStarted",
            SagaEvent::PositionQueried { .. } => "PositionQueried",
            SagaEvent::SourceDebited { .. } => "SourceDebited",
            SagaEvent::IntermediaryDebited { .. } => "IntermediaryDebited",
            SagaEvent::DestinationCredited { .. } => "DestinationCredited",
            SagaEvent::OrderPlaced { .. } => "OrderPlaced",
            SagaEvent::OrderRejected { .. } => "OrderRejected",
            SagaEvent::CompensationStarted { .. } => "CompensationStarted",
            SagaEvent::IntermediaryCompensated { .. } => "IntermediaryCompensated",
            SagaEvent::SourceCompensated { .. } => "SourceCompensated",
            SagaEvent::WorkflowFailed { .. } => "WorkflowFailed",
            SagaEvent::FillStatusRecorded { .. } => "FillStatusRecorded",
            SagaEvent::FillReportIgnored { .. } => "FillReportIgnored",
            SagaEvent::ManualInterventionRequired { .. } => "ManualInterventionRequired",
        }
    }
}

impl SagaEvent {
    /// Step the workflow is in after this event, if the event moves it
    pub fn target_step(&self) -> Option<SagaStep> {
        match self {
            SagaEvent::WorkflowStarted { .. } => Some(SagaStep::QueryingPosition),
            SagaEvent::PositionQueried { .. } => Some(SagaStep::DebitingSource),
            SagaEvent::SourceDebited { .. } => Some(SagaStep::DebitingIntermediary),
            SagaEvent::IntermediaryDebited { .. } => Some(SagaStep::CreditingDestination),
            SagaEvent::DestinationCredited { .. } => Some(SagaStep::PlacingOrder),
            SagaEvent::OrderPlaced { .. } => Some(SagaStep::Completed),
            SagaEvent::OrderRejected { .. } => Some(SagaStep::CompensatingIntermediary),
            SagaEvent::CompensationStarted { next, .. } => Some(*next),
            SagaEvent::IntermediaryCompensated { .. } => Some(SagaStep::CompensatingSource),
            SagaEvent::SourceCompensated { .. } | SagaEvent::WorkflowFailed { .. } => {
                Some(SagaStep::Failed)
            }
            SagaEvent::FillStatusRecorded { .. }
            | SagaEvent::FillReportIgnored { .. }
            | SagaEvent::ManualInterventionRequired { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SagaState {
    pub step: SagaStep,
    pub request: Option<OrderRequest>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    /// User's position in the symbol when the workflow started
    pub net_position_at_start: Option<Decimal>,
    pub fill_status: Option<FillStatus>,
    pub filled_qty: Decimal,
    pub is_timeout: bool,
    pub fill_reason: Option<String>,
    pub rejection_reason: Option<String>,
    /// Reason of the first forward failure, kept through compensation
    pub failure_reason: Option<String>,
    pub failure: Option<SagaFailure>,
    pub unresolved_remainder: Option<Decimal>,
}

impl SagaState {
    pub fn order_id(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.order_id.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.request.as_ref().map(|r| r.user_id.as_str())
    }

    pub fn amount(&self) -> Decimal {
        self.request
            .as_ref()
            .map(|r| r.amount())
            .unwrap_or(Decimal::ZERO)
    }

    /// Best-known outcome, for status queries. A failed or compensating
    /// workflow reports that, whatever fill status was recorded before.
    pub fn status(&self, order_id: &str) -> OrderResult {
        let unwinding = self.step == SagaStep::Failed || self.step.is_compensating();
        if let Some(fill_status) = self.fill_status.filter(|_| !unwinding) {
            let mut result = OrderResult::new(order_id, fill_status.into(), self.filled_qty);
            result.is_timeout = self.is_timeout;
            result.reason = self.fill_reason.clone();
            return result;
        }

        match self.step {
            SagaStep::Completed => OrderResult::new(order_id, OrderOutcome::Placed, Decimal::ZERO),
            SagaStep::Failed => {
                let reason = match &self.failure {
                    Some(SagaFailure {
                        kind: FailureKind::Compensation,
                        reason,
                    }) => format!("Compensation failed: {}", reason),
                    Some(SagaFailure { reason, .. }) => reason.clone(),
                    None => "Workflow failed".to_string(),
                };
                OrderResult::new(order_id, OrderOutcome::Failed, Decimal::ZERO).with_reason(reason)
            }
            step if step.is_compensating() => {
                let mut result =
                    OrderResult::new(order_id, OrderOutcome::Compensating, Decimal::ZERO);
                result.reason = self.failure_reason.clone();
                result
            }
            _ => OrderResult::new(order_id, OrderOutcome::Pending, Decimal::ZERO),
        }
    }
}

impl EventSourced for SagaState {
    type Event = SagaEvent;

    fn apply(&mut self, event: &SagaEvent) {
        if let Some(step) = event.target_step() {
            self.step = step;
        }

        match event {
            SagaEvent::WorkflowStarted { request, at } => {
                self.request = Some(request.clone());
                self.started_at = Some(*at);
                self.last_activity = Some(*at);
            }
            SagaEvent::PositionQueried { net_position, at } => {
                self.net_position_at_start = Some(*net_position);
                self.last_activity = Some(*at);
            }
            SagaEvent::SourceDebited { at }
            | SagaEvent::IntermediaryDebited { at }
            | SagaEvent::DestinationCredited { at }
            | SagaEvent::OrderPlaced { at }
            | SagaEvent::IntermediaryCompensated { at } => {
                self.last_activity = Some(*at);
            }
            SagaEvent::OrderRejected { reason, at } => {
                // Any earlier timeout report described an order that never existed
                self.fill_status = None;
                self.filled_qty = Decimal::ZERO;
                self.is_timeout = false;
                self.fill_reason = None;
                self.rejection_reason = Some(reason.clone());
                self.failure_reason = Some(format!("Order rejected: {}", reason));
                self.last_activity = Some(*at);
            }
            SagaEvent::CompensationStarted { reason, at, .. } => {
                self.failure_reason = Some(reason.clone());
                self.last_activity = Some(*at);
            }
            SagaEvent::SourceCompensated { at } => {
                self.failure = Some(SagaFailure {
                    kind: FailureKind::Service,
                    reason: self
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "Workflow failed".to_string()),
                });
                self.last_activity = Some(*at);
            }
            SagaEvent::WorkflowFailed { kind, reason, at } => {
                self.failure = Some(SagaFailure {
                    kind: *kind,
                    reason: reason.clone(),
                });
                self.last_activity = Some(*at);
            }
            SagaEvent::FillStatusRecorded {
                status,
                filled_qty,
                is_timeout,
                reason,
                at,
            } => {
                self.fill_status = Some(*status);
                self.filled_qty = *filled_qty;
                self.is_timeout = *is_timeout;
                self.fill_reason = reason.clone();
                self.last_activity = Some(*at);
            }
            SagaEvent::FillReportIgnored { at, .. } => {
                self.last_activity = Some(*at);
            }
            SagaEvent::ManualInterventionRequired { remainder, at } => {
                self.unresolved_remainder = Some(*remainder);
                self.last_activity = Some(*at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use rust_decimal_macros::dec;

    fn started() -> SagaEvent {
        SagaEvent::WorkflowStarted {
            request: OrderRequest::market("o-1", "u-1", "KXBTC", OrderSide::Buy, dec!(25)),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_event_targets_follow_step_edges() {
        let now = Utc::now();
        let events = vec![
            started(),
            SagaEvent::PositionQueried {
                net_position: dec!(0),
                at: now,
            },
            SagaEvent::SourceDebited { at: now },
            SagaEvent::IntermediaryDebited { at: now },
            SagaEvent::DestinationCredited { at: now },
            SagaEvent::OrderRejected {
                reason: "halted".to_string(),
                at: now,
            },
            SagaEvent::IntermediaryCompensated { at: now },
            SagaEvent::SourceCompensated { at: now },
        ];

        let mut state = SagaState::default();
        for event in &events {
            if let Some(target) = event.target_step() {
                assert!(
                    state.step.can_transition_to(target),
                    "{} -> {}",
                    state.step,
                    target
                );
            }
            state.apply(event);
        }

        assert_eq!(state.step, SagaStep::Failed);
        assert_eq!(state.amount(), dec!(25));
        let status = state.status("o-1");
        assert_eq!(status.outcome, OrderOutcome::Failed);
        assert_eq!(status.reason.as_deref(), Some("Order rejected: halted"));
    }

    #[test]
    fn test_status_by_step() {
        let mut state = SagaState::default();
        assert_eq!(state.status("o-1").outcome, OrderOutcome::Pending);

        state.apply(&started());
        state.apply(&SagaEvent::CompensationStarted {
            next: SagaStep::CompensatingSource,
            reason: "exchange wallet down".to_string(),
            at: Utc::now(),
        });
        assert_eq!(state.status("o-1").outcome, OrderOutcome::Compensating);

        state.apply(&SagaEvent::WorkflowFailed {
            kind: FailureKind::Compensation,
            reason: "source wallet down".to_string(),
            at: Utc::now(),
        });
        let status = state.status("o-1");
        assert_eq!(status.outcome, OrderOutcome::Failed);
        assert_eq!(
            status.reason.as_deref(),
            Some("Compensation failed: source wallet down")
        );
    }

    #[test]
    fn test_fill_status_takes_precedence() {
        let mut state = SagaState::default();
        state.apply(&started());
        state.apply(&SagaEvent::OrderPlaced { at: Utc::now() });
        assert_eq!(state.status("o-1").outcome, OrderOutcome::Placed);

        state.apply(&SagaEvent::FillStatusRecorded {
            status: FillStatus::NotFilled,
            filled_qty: Decimal::ZERO,
            is_timeout: true,
            reason: None,
            at: Utc::now(),
        });
        let status = state.status("o-1");
        assert_eq!(status.outcome, OrderOutcome::NotFilled);
        assert!(status.is_timeout);
    }

    #[test]
    fn test_rejection_after_timeout_report_ends_failed() {
        let now = Utc::now();
        let mut state = SagaState::default();
        state.apply(&started());
        state.apply(&SagaEvent::PositionQueried {
            net_position: dec!(0),
            at: now,
        });
        state.apply(&SagaEvent::SourceDebited { at: now });
        state.apply(&SagaEvent::IntermediaryDebited { at: now });
        state.apply(&SagaEvent::DestinationCredited { at: now });
        // Fill timer fired before the exchange answered
        state.apply(&SagaEvent::FillStatusRecorded {
            status: FillStatus::NotFilled,
            filled_qty: Decimal::ZERO,
            is_timeout: true,
            reason: None,
            at: now,
        });
        assert_eq!(state.step, SagaStep::PlacingOrder);

        state.apply(&SagaEvent::OrderRejected {
            reason: "halted".to_string(),
            at: now,
        });
        assert_eq!(state.fill_status, None);
        assert_eq!(state.status("o-1").outcome, OrderOutcome::Compensating);

        state.apply(&SagaEvent::IntermediaryCompensated { at: now });
        state.apply(&SagaEvent::SourceCompensated { at: now });
        let status = state.status("o-1");
        assert_eq!(status.outcome, OrderOutcome::Failed);
        assert!(!status.is_timeout);
        assert_eq!(status.reason.as_deref(), Some("Order rejected: halted"));
    }
}
