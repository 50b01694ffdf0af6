use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use tracing::{info, warn};

use super::{api_error, ApiError};
use crate::api::{state::AppState, types::*};
use crate::coordinator::{WorkflowReply, ALREADY_STARTED};
use crate::domain::{OrderRequest, OrderType, TimeInForce};
use crate::error::OrderflowError;

pub const DEV_USER_HEADER: &str = "X-Dev-User";
pub const DEFAULT_USER: &str = "default-user";

fn user_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(DEV_USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

fn to_order_request(req: OrderRequestV1, user_id: String) -> OrderRequest {
    let time_in_force = req
        .time_in_force
        .unwrap_or_else(|| TimeInForce::default_for(req.order_type));
    OrderRequest {
        order_id: req.bet_order_id,
        symbol: req.symbol,
        side: req.side,
        quantity: req.quantity,
        price: req.price,
        order_type: req.order_type,
        time_in_force,
        user_id,
    }
}

fn from_reply(order_id: &str, reply: WorkflowReply) -> OrderSubmitResponse {
    let mut resp = OrderSubmitResponse {
        bet_order_id: order_id.to_string(),
        status: SubmitStatus::Started,
        outcome: None,
        filled_qty: None,
        is_timeout: None,
        message: None,
    };
    match reply {
        WorkflowReply::WorkflowStarted { .. } => {
            resp.message = Some(format!("Workflow started for orderId: {}", order_id));
        }
        WorkflowReply::WorkflowFailed { reason, .. } => {
            resp.status = SubmitStatus::Failed;
            resp.message = Some(reason);
        }
        WorkflowReply::OrderResult(result) => {
            resp.status = SubmitStatus::Completed;
            resp.outcome = Some(result.outcome);
            resp.filled_qty = Some(result.filled_qty);
            resp.is_timeout = Some(result.is_timeout);
            resp.message = result.reason;
        }
    }
    resp
}

/// POST /v1/order
pub async fn place_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OrderRequestV1>,
) -> Result<Json<OrderSubmitResponse>, ApiError> {
    let user_id = user_from_headers(&headers);
    info!(
        bet_order_id = %req.bet_order_id,
        %user_id,
        symbol = %req.symbol,
        side = %req.side,
        quantity = %req.quantity,
        order_type = ?req.order_type,
        time_in_force = ?req.time_in_force,
        "Order request received"
    );

    let request = to_order_request(req, user_id);
    let mut subscription = state.workflows.start_workflow(request).await?;
    let order_id = subscription.order_id.clone();

    match &subscription.first {
        WorkflowReply::WorkflowStarted { .. } => {}
        WorkflowReply::WorkflowFailed { reason, .. } => {
            warn!(bet_order_id = %order_id, %reason, "Workflow not started");
            let status = if reason == ALREADY_STARTED {
                StatusCode::CONFLICT
            } else if reason.starts_with("Invalid order request") {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            return Err(api_error(status, format!("Workflow failed: {}", reason)));
        }
        WorkflowReply::OrderResult(_) => {}
    }

    let started = from_reply(&order_id, subscription.first.clone());
    match subscription.next_update(state.result_timeout).await {
        Some(update) => Ok(Json(from_reply(&order_id, update))),
        None => Ok(Json(started)),
    }
}

/// POST /v1/order/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CancelOrderRequest>,
) -> Result<(StatusCode, Json<CancelOrderResponse>), ApiError> {
    let user_id = user_from_headers(&headers);
    info!(bet_order_id = %req.bet_order_id, %user_id, "Cancel request received");

    state
        .workflows
        .cancel_order(&req.bet_order_id, req.reason)
        .await
        .map_err(|e| match e {
            OrderflowError::Validation(msg) => api_error(StatusCode::CONFLICT, msg),
            other => other.into(),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelOrderResponse {
            bet_order_id: req.bet_order_id,
            status: "CANCEL_REQUESTED".to_string(),
        }),
    ))
}

/// GET /order/:order_id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let saga = state.workflows.workflow_state(&order_id).await?;
    let result = state.workflows.get_status(&order_id).await?;

    Ok(Json(OrderStatusResponse {
        bet_order_id: order_id,
        step: saga.step,
        outcome: result.outcome,
        amount: saga.amount(),
        filled_qty: result.filled_qty,
        is_timeout: result.is_timeout,
        reason: result.reason,
        unresolved_remainder: saga.unresolved_remainder,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use crate::domain::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn test_dev_user_header_defaults() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_from_headers(&headers), DEFAULT_USER);
        headers.insert(DEV_USER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(user_from_headers(&headers), "alice");
    }

    #[test]
    fn test_time_in_force_defaults_by_order_type() {
        let market = OrderRequestV1 {
            bet_order_id: "b-1".to_string(),
            symbol: "KXBTC".to_string(),
            side: OrderSide::Buy,
            quantity: dec!(5),
            price: None,
            order_type: OrderType::Market,
            time_in_force: None,
        };
        let mut limit = market.clone();
        limit.order_type = OrderType::Limit;
        limit.price = Some(dec!(0.45));
        let mut explicit = limit.clone();
        explicit.time_in_force = Some(TimeInForce::FOK);

        assert_eq!(
            to_order_request(market, "u".into()).time_in_force,
            TimeInForce::IOC
        );
        assert_eq!(
            to_order_request(limit, "u".into()).time_in_force,
            TimeInForce::GTC
        );
        assert_eq!(
            to_order_request(explicit, "u".into()).time_in_force,
            TimeInForce::FOK
        );
    }
}
