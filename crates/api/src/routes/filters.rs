//! Filter state endpoints.
//!
//! Each caller has one filter store. Mutations are persisted after they are
//! applied; a failed save is logged and does not fail the request.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use domain::models::{ActiveFilter, FilterFieldError, FilterPatch, FilterPreset, FilterState};
use domain::services::FilterStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserContext;

/// Snapshot of a caller's filter store.
#[derive(Debug, Serialize)]
pub struct FilterStateResponse {
    pub filters: FilterState,
    pub is_valid: bool,
    pub validation_errors: Vec<FilterFieldError>,
    pub active_filter_count: usize,
    pub active_filters: Vec<ActiveFilter>,
    pub can_undo: bool,
}

impl From<&FilterStore> for FilterStateResponse {
    fn from(store: &FilterStore) -> Self {
        Self {
            filters: store.get().clone(),
            is_valid: store.is_valid(),
            validation_errors: store.validation_errors().to_vec(),
            active_filter_count: store.active_filter_count(),
            active_filters: store.describe_active_filters(),
            can_undo: store.can_undo(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SavePresetRequest {
    pub label: String,
}

/// Runs `mutate` against the caller's store and persists the result.
async fn mutate<T>(
    state: &AppState,
    user: UserContext,
    mutate: impl FnOnce(&mut FilterStore) -> T,
) -> (T, FilterStateResponse) {
    let store = state.filters.get(user.user_id).await;
    let mut store = store.lock().await;
    let outcome = mutate(&mut store);
    state.filters.persist(user.user_id, &store).await;
    (outcome, FilterStateResponse::from(&*store))
}

/// GET /api/v1/filters
pub async fn get_filters(
    State(state): State<AppState>,
    user: UserContext,
) -> Json<FilterStateResponse> {
    let store = state.filters.get(user.user_id).await;
    let store = store.lock().await;
    Json(FilterStateResponse::from(&*store))
}

/// Merge a partial update into the current filters.
///
/// PATCH /api/v1/filters
pub async fn update_filters(
    State(state): State<AppState>,
    user: UserContext,
    Json(patch): Json<FilterPatch>,
) -> Result<Json<FilterStateResponse>, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::Validation("No filter changes supplied".to_string()));
    }
    let (_, response) = mutate(&state, user, |store| store.update(patch)).await;
    Ok(Json(response))
}

/// Forget persisted filters and return to the blank state.
///
/// DELETE /api/v1/filters
pub async fn delete_filters(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<FilterStateResponse>, ApiError> {
    let store = state.filters.get(user.user_id).await;
    let mut store = store.lock().await;
    store.clear_persistence().await?;
    store.clear();
    info!(user_id = %user.user_id, "Persisted filters removed");
    Ok(Json(FilterStateResponse::from(&*store)))
}

/// POST /api/v1/filters/reset
pub async fn reset_filters(
    State(state): State<AppState>,
    user: UserContext,
) -> Json<FilterStateResponse> {
    let (_, response) = mutate(&state, user, FilterStore::reset).await;
    Json(response)
}

/// POST /api/v1/filters/clear
pub async fn clear_filters(
    State(state): State<AppState>,
    user: UserContext,
) -> Json<FilterStateResponse> {
    let (_, response) = mutate(&state, user, FilterStore::clear).await;
    Json(response)
}

/// POST /api/v1/filters/undo
pub async fn undo_filters(
    State(state): State<AppState>,
    user: UserContext,
) -> Result<Json<FilterStateResponse>, ApiError> {
    let (restored, response) = mutate(&state, user, FilterStore::undo).await;
    match restored {
        Some(_) => Ok(Json(response)),
        None => Err(ApiError::Conflict("Nothing to undo".to_string())),
    }
}

/// GET /api/v1/filters/presets
pub async fn list_presets(
    State(state): State<AppState>,
    user: UserContext,
) -> Json<Vec<FilterPreset>> {
    let store = state.filters.get(user.user_id).await;
    let presets = store.lock().await.presets();
    Json(presets)
}

/// Save the current filters under a label, replacing any preset with it.
///
/// POST /api/v1/filters/presets
pub async fn save_preset(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<SavePresetRequest>,
) -> Result<(StatusCode, Json<FilterPreset>), ApiError> {
    let (saved, _) = mutate(&state, user, |store| store.save_preset(&request.label)).await;
    let preset = saved.map_err(|e| ApiError::InvalidFilters(vec![e.into()]))?;
    info!(user_id = %user.user_id, label = %preset.label, "Filter preset saved");
    Ok((StatusCode::CREATED, Json(preset)))
}

/// POST /api/v1/filters/presets/:label/apply
pub async fn apply_preset(
    State(state): State<AppState>,
    user: UserContext,
    Path(label): Path<String>,
) -> Result<Json<FilterStateResponse>, ApiError> {
    let (applied, response) = mutate(&state, user, |store| store.apply_preset(&label)).await;
    match applied {
        Some(_) => Ok(Json(response)),
        None => Err(ApiError::NotFound(format!("Preset '{}' not found", label))),
    }
}

/// DELETE /api/v1/filters/presets/:label
pub async fn delete_preset(
    State(state): State<AppState>,
    user: UserContext,
    Path(label): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (deleted, _) = mutate(&state, user, |store| store.delete_preset(&label)).await;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Preset '{}' not found", label)))
    }
}
