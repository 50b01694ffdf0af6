use axum::{
    extract::{Query, State},
    Json,
};

use super::ApiError;
use crate::api::{state::AppState, types::*};

/// GET /v1/portfolio/position?userId=..&symbol=..
pub async fn get_position(
    State(state): State<AppState>,
    Query(q): Query<PositionQuery>,
) -> Result<Json<PositionResponse>, ApiError> {
    let net_position = state.workflows.position(&q.user_id, &q.symbol).await?;
    Ok(Json(PositionResponse {
        user_id: q.user_id,
        symbol: q.symbol,
        net_position,
    }))
}

/// GET /v1/portfolio?userId=..
pub async fn get_portfolio(
    State(state): State<AppState>,
    Query(q): Query<PortfolioQuery>,
) -> Result<Json<PortfolioResponse>, ApiError> {
    let positions: Vec<PortfolioPosition> = state
        .workflows
        .positions(&q.user_id)
        .await?
        .into_iter()
        .map(|(symbol, net_position)| PortfolioPosition {
            symbol,
            net_position,
        })
        .collect();

    Ok(Json(PortfolioResponse {
        user_id: q.user_id,
        total_positions: positions.len(),
        positions,
    }))
}
