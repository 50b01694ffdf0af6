use serde::{Deserialize, Serialize};
use std::fmt;

/// Order workflow (saga) steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    /// Created, nothing started
    #[default]
    Init,
    /// Waiting for the user's position in the symbol
    QueryingPosition,
    /// Debiting the user's source wallet
    DebitingSource,
    /// Debiting the exchange-side intermediary wallet
    DebitingIntermediary,
    /// Crediting the exchange destination account
    CreditingDestination,
    /// Order handed to the order entity, waiting for exchange acceptance
    PlacingOrder,
    /// Order accepted; fills are tracked from here
    Completed,
    /// Workflow ended without an order on the exchange
    Failed,
    /// Returning funds to the source wallet
    CompensatingSource,
    /// Reversing the intermediary movement
    CompensatingIntermediary,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Init => "INIT",
            SagaStep::QueryingPosition => "QUERYING_POSITION",
            SagaStep::DebitingSource => "DEBITING_SOURCE",
            SagaStep::DebitingIntermediary => "DEBITING_INTERMEDIARY",
            SagaStep::CreditingDestination => "CREDITING_DESTINATION",
            SagaStep::PlacingOrder => "PLACING_ORDER",
            SagaStep::Completed => "COMPLETED",
            SagaStep::Failed => "FAILED",
            SagaStep::CompensatingSource => "COMPENSATING_SOURCE",
            SagaStep::CompensatingIntermediary => "COMPENSATING_INTERMEDIARY",
        }
    }

    /// Check if this step can transition to another step
    pub fn can_transition_to(&self, target: SagaStep) -> bool {
        use SagaStep::*;

        match (self, target) {
            (Init, QueryingPosition) => true,

            (QueryingPosition, DebitingSource) => true,

            (DebitingSource, DebitingIntermediary) => true,
            (DebitingSource, Failed) => true, // nothing to undo

            (DebitingIntermediary, CreditingDestination) => true,
            (DebitingIntermediary, CompensatingSource) => true,

            (CreditingDestination, PlacingOrder) => true,
            (CreditingDestination, CompensatingIntermediary) => true,
            (CreditingDestination, CompensatingSource) => true,

            (PlacingOrder, Completed) => true,
            (PlacingOrder, CompensatingIntermediary) => true, // exchange rejected

            (CompensatingIntermediary, CompensatingSource) => true,
            (CompensatingIntermediary, Failed) => true, // compensation failed

            (CompensatingSource, Failed) => true,

            _ => false,
        }
    }

    /// Get valid next steps from the current step
    pub fn valid_transitions(&self) -> Vec<SagaStep> {
        use SagaStep::*;

        match self {
            Init => vec![QueryingPosition],
            QueryingPosition => vec![DebitingSource],
            DebitingSource => vec![DebitingIntermediary, Failed],
            DebitingIntermediary => vec![CreditingDestination, CompensatingSource],
            CreditingDestination => vec![
                PlacingOrder,
                CompensatingIntermediary,
                CompensatingSource,
            ],
            PlacingOrder => vec![Completed, CompensatingIntermediary],
            CompensatingIntermediary => vec![CompensatingSource, Failed],
            CompensatingSource => vec![Failed],
            Completed | Failed => vec![],
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStep::Completed | SagaStep::Failed)
    }

    pub fn is_compensating(&self) -> bool {
        matches!(
            self,
            SagaStep::CompensatingSource | SagaStep::CompensatingIntermediary
        )
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for SagaStep {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "INIT" => Ok(SagaStep::Init),
            "QUERYING_POSITION" => Ok(SagaStep::QueryingPosition),
            "DEBITING_SOURCE" => Ok(SagaStep::DebitingSource),
            "DEBITING_INTERMEDIARY" => Ok(SagaStep::DebitingIntermediary),
            "CREDITING_DESTINATION" => Ok(SagaStep::CreditingDestination),
            "PLACING_ORDER" => Ok(SagaStep::PlacingOrder),
            "COMPLETED" => Ok(SagaStep::Completed),
            "FAILED" => Ok(SagaStep::Failed),
            "COMPENSATING_SOURCE" => Ok(SagaStep::CompensatingSource),
            "COMPENSATING_INTERMEDIARY" => Ok(SagaStep::CompensatingIntermediary),
            _ => Err(format!("Unknown step: {}", s)),
        }
    }
}

/// Exchange-facing lifecycle of a single order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// No PlaceOrder received yet
    #[default]
    Unplaced,
    /// Sent to the gateway, not yet acknowledged
    Placed,
    /// Acknowledged by the exchange, no fills yet
    Accepted,
    Rejected,
    PartiallyFilled,
    Filled,
    Cancelled,
    /// Fill timer elapsed before the order completed
    TimedOut,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Unplaced => "UNPLACED",
            OrderStatus::Placed => "PLACED",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::TimedOut => "TIMED_OUT",
        }
    }

    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, target) {
            (Unplaced, Placed) => true,

            (Placed, Accepted) => true,
            (Placed, Rejected) => true,

            (Accepted, PartiallyFilled) => true,
            (Accepted, Filled) => true,
            (Accepted, Cancelled) => true,
            (Accepted, TimedOut) => true,

            (PartiallyFilled, PartiallyFilled) => true,
            (PartiallyFilled, Filled) => true,
            (PartiallyFilled, Cancelled) => true,
            (PartiallyFilled, TimedOut) => true,

            // A timeout is a report, not an exchange-side terminal state
            (TimedOut, PartiallyFilled) => true,
            (TimedOut, Filled) => true,
            (TimedOut, Cancelled) => true,

            _ => false,
        }
    }

    /// Whether the exchange can still report fills for this order
    pub fn accepts_fills(&self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted | OrderStatus::PartiallyFilled | OrderStatus::TimedOut
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Rejected | OrderStatus::Filled | OrderStatus::Cancelled
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
