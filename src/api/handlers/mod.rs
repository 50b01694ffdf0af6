pub mod orders;
pub mod portfolio;
pub mod system;

pub use orders::*;
pub use portfolio::*;
pub use system::*;

use axum::{http::StatusCode, Json};

use crate::api::types::ErrorResponse;
use crate::error::OrderflowError;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<OrderflowError> for ApiError {
    fn from(e: OrderflowError) -> Self {
        let status = match &e {
            OrderflowError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderflowError::Validation(_) => StatusCode::BAD_REQUEST,
            OrderflowError::AskTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OrderflowError::EntityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        api_error(status, e.to_string())
    }
}
