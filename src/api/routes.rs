use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Order endpoints
        .route("/v1/order", post(handlers::place_order))
        .route("/v1/order/cancel", post(handlers::cancel_order))
        .route("/order/:order_id", get(handlers::get_order))
        // Portfolio endpoints
        .route("/v1/portfolio", get(handlers::get_portfolio))
        .route("/v1/portfolio/position", get(handlers::get_position))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/healthz", get(handlers::liveness_handler))
        // Add state and CORS
        .with_state(state)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{OrderStatusResponse, OrderSubmitResponse, PositionResponse, SubmitStatus};
    use crate::config::AppConfig;
    use crate::coordinator::OrderSystem;
    use crate::domain::{OrderOutcome, SagaStep};
    use crate::persistence::{Persistence, SnapshotPolicy};
    use crate::services::WorkflowService;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rust_decimal_macros::dec;
    use serde::de::DeserializeOwned;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(config: AppConfig) -> Router {
        let system = OrderSystem::start(
            &config,
            Persistence::in_memory(SnapshotPolicy::disabled()),
        )
        .unwrap();
        let service = WorkflowService::new(Arc::new(system), Duration::from_secs(2));
        create_router(AppState::new(service, Duration::from_secs(2)))
    }

    fn quick_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.simulator.gateway_latency_ms = 0;
        config.runtime.fill_timeout_ms = 300;
        config
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn json<T: DeserializeOwned>(body: &[u8]) -> T {
        serde_json::from_slice(body).unwrap()
    }

    fn post_order(body: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/order")
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("X-Dev-User", user);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_market_order_fills_and_updates_position() {
        let app = app(quick_config());
        let (status, body) = send(
            &app,
            post_order(
                r#"{"betOrderId":"b-1","symbol":"KXBTC","side":"BUY","quantity":"10","orderType":"MARKET"}"#,
                Some("alice"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resp: OrderSubmitResponse = json(&body);
        assert_eq!(resp.status, SubmitStatus::Completed);
        assert_eq!(resp.outcome, Some(OrderOutcome::Filled));
        assert_eq!(resp.filled_qty, Some(dec!(10)));

        let (status, body) = send(&app, get("/order/b-1")).await;
        assert_eq!(status, StatusCode::OK);
        let order: OrderStatusResponse = json(&body);
        assert_eq!(order.step, SagaStep::Completed);
        assert_eq!(order.outcome, OrderOutcome::Filled);

        let (status, body) = send(
            &app,
            get("/v1/portfolio/position?userId=alice&symbol=KXBTC"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let position: PositionResponse = json(&body);
        assert_eq!(position.net_position, dec!(10));
    }

    #[tokio::test]
    async fn test_duplicate_order_conflicts() {
        let app = app(quick_config());
        let body =
            r#"{"betOrderId":"b-2","symbol":"KXBTC","side":"SELL","quantity":"3","orderType":"MARKET"}"#;
        let (status, _) = send(&app, post_order(body, None)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, post_order(body, None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(String::from_utf8_lossy(&body).contains("Already started"));
    }

    #[tokio::test]
    async fn test_limit_without_price_is_bad_request() {
        let app = app(quick_config());
        let (status, _) = send(
            &app,
            post_order(
                r#"{"betOrderId":"b-3","symbol":"KXBTC","side":"BUY","quantity":"1","orderType":"LIMIT"}"#,
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let app = app(quick_config());
        let (status, _) = send(&app, get("/order/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let cancel = Request::builder()
            .method("POST")
            .uri("/v1/order/cancel")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"betOrderId":"missing"}"#))
            .unwrap();
        let (status, _) = send(&app, cancel).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = app(quick_config());
        let (status, body) = send(&app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = json(&body);
        assert_eq!(health["status"], "healthy");
    }
}
