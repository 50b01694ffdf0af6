use chrono::{DateTime, Utc};

use crate::domain::OrderRequest;
use crate::runtime::Recipient;

/// Requests understood by the exchange gateway.
///
/// Fills and cancellations are not replies: the gateway pushes them into the
/// order entity through the order resolver as they happen.
#[derive(Debug, Clone)]
pub enum GatewayCommand {
    SendOrder {
        order_id: String,
        request: OrderRequest,
        reply_to: Recipient<GatewayReply>,
    },
    CancelOrder {
        order_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayReply {
    OrderAccepted {
        order_id: String,
        at: DateTime<Utc>,
    },
    OrderRejected {
        order_id: String,
        reason: String,
    },
}

impl GatewayReply {
    pub fn order_id(&self) -> &str {
        match self {
            GatewayReply::OrderAccepted { order_id, .. }
            | GatewayReply::OrderRejected { order_id, .. } => order_id,
        }
    }
}
