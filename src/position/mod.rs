//! Per-user net positions

pub mod ledger;
pub mod state;

pub use ledger::{PositionCommand, PositionLedger, PositionReply};
pub use state::{PositionEvent, PositionState};
