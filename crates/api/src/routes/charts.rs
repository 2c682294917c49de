//! Chart data endpoints.
//!
//! Every chart request goes through the fetch coordinator, which serves
//! cached results, joins identical in-flight fetches and guards against
//! stale responses overwriting newer ones. A request made with the caller's
//! stored filters is abandoned when those filters change before it settles.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use domain::models::{ChartKind, FilterState};
use domain::services::{FetchMode, FetchOutcome};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserContext;

/// Body of `POST /api/v1/charts/:kind`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChartRequest {
    /// Falls back to the caller's stored filters when absent.
    pub filters: Option<FilterState>,
    pub force_refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ChartResponse {
    pub kind: ChartKind,
    pub cache_key: String,
    pub cache_hit: bool,
    pub fetched_at: DateTime<Utc>,
    pub data: Value,
}

impl ChartResponse {
    fn new(kind: ChartKind, outcome: FetchOutcome) -> Self {
        Self {
            kind,
            cache_key: outcome.key.to_string(),
            cache_hit: outcome.cache_hit,
            fetched_at: outcome.fetched_at,
            data: outcome.payload.as_ref().clone(),
        }
    }
}

pub(crate) fn parse_kind(raw: &str) -> Result<ChartKind, ApiError> {
    raw.parse::<ChartKind>().map_err(ApiError::NotFound)
}

async fn session_filters(
    state: &AppState,
    user: UserContext,
) -> (FilterState, watch::Receiver<FilterState>) {
    let store = state.filters.get(user.user_id).await;
    let store = store.lock().await;
    (store.get().clone(), store.subscribe())
}

/// Resolves once the stored filters differ from `requested`.
async fn superseded(changes: &mut watch::Receiver<FilterState>, requested: &FilterState) {
    loop {
        if changes.changed().await.is_err() {
            return std::future::pending().await;
        }
        if *changes.borrow_and_update() != *requested {
            return;
        }
    }
}

async fn request_for_session(
    state: &AppState,
    user: UserContext,
    kind: ChartKind,
    mode: FetchMode,
) -> Result<FetchOutcome, ApiError> {
    let (filters, mut changes) = session_filters(state, user).await;

    tokio::select! {
        biased;
        _ = superseded(&mut changes, &filters) => {
            debug!(user_id = %user.user_id, chart = %kind, "Chart request superseded by a filter change");
            Err(ApiError::Conflict("Filters changed while the chart was loading".to_string()))
        }
        outcome = state.coordinator.request(kind, &filters, mode) => Ok(outcome?),
    }
}

/// Query a chart with explicit filters.
///
/// POST /api/v1/charts/:kind
pub async fn query_chart(
    State(state): State<AppState>,
    user: UserContext,
    Path(kind): Path<String>,
    Json(request): Json<ChartRequest>,
) -> Result<Json<ChartResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let mode = if request.force_refresh {
        FetchMode::Force
    } else {
        FetchMode::Cached
    };

    debug!(user_id = %user.user_id, chart = %kind, ?mode, "Chart requested");
    let outcome = match request.filters {
        Some(filters) => state.coordinator.request(kind, &filters, mode).await?,
        None => request_for_session(&state, user, kind, mode).await?,
    };
    Ok(Json(ChartResponse::new(kind, outcome)))
}

/// Query a chart with the caller's stored filters.
///
/// Answers 409 when the filters change before the data arrives.
///
/// GET /api/v1/charts/:kind
pub async fn get_chart(
    State(state): State<AppState>,
    user: UserContext,
    Path(kind): Path<String>,
) -> Result<Json<ChartResponse>, ApiError> {
    let kind = parse_kind(&kind)?;
    let outcome = request_for_session(&state, user, kind, FetchMode::Cached).await?;
    Ok(Json(ChartResponse::new(kind, outcome)))
}
