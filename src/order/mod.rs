//! Per-order exchange lifecycle: placement, acceptance, fills, cancellation and
//! the fill timeout.

pub mod entity;
pub mod state;

pub use entity::{FillReport, OrderCommand, OrderEntity, OrderReply, ALREADY_PLACED};
pub use state::{OrderEntityState, OrderEvent};
