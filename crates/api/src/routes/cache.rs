//! Chart cache administration endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use domain::services::CacheStats;
use serde::Serialize;
use tracing::info;

use super::charts::parse_kind;
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserContext;

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: usize,
}

/// GET /api/v1/cache/stats
pub async fn cache_stats(State(state): State<AppState>, _user: UserContext) -> Json<CacheStats> {
    Json(state.coordinator.cache().stats())
}

/// Drop every cached chart.
///
/// DELETE /api/v1/cache
pub async fn invalidate_all(
    State(state): State<AppState>,
    user: UserContext,
) -> Json<InvalidateResponse> {
    let invalidated = state.coordinator.cache().invalidate_all();
    info!(user_id = %user.user_id, invalidated = invalidated, "Chart cache cleared");
    Json(InvalidateResponse { invalidated })
}

/// Drop cached results for one chart kind.
///
/// DELETE /api/v1/cache/:kind
pub async fn invalidate_kind(
    State(state): State<AppState>,
    user: UserContext,
    Path(kind): Path<String>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let invalidated = state.coordinator.cache().invalidate_kind(kind);
    info!(
        user_id = %user.user_id,
        chart = %kind,
        invalidated = invalidated,
        "Chart cache invalidated"
    );
    Ok(Json(InvalidateResponse { invalidated }))
}
