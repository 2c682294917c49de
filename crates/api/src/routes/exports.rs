//! Export ledger endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::{
    BulkExportRequest, BulkExportResponse, ChartKind, ExportFormat, ExportResponse,
    FilterState, IssuedDownload, ListExportsQuery,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserContext;
use crate::services::ExportPage;

/// Body of `POST /api/v1/exports`.
#[derive(Debug, Deserialize)]
pub struct CreateExportRequest {
    pub kind: ChartKind,
    /// Falls back to the caller's stored filters when absent.
    #[serde(default)]
    pub filters: Option<FilterState>,
    #[serde(default)]
    pub format: ExportFormat,
}

/// A freshly issued download link. The token is only ever shown here.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLinkResponse {
    #[serde(flatten)]
    pub issued: IssuedDownload,
    pub download_url: String,
}

/// GET /api/v1/exports?status=&limit=&cursor=
pub async fn list_exports(
    State(state): State<AppState>,
    user: UserContext,
    Query(query): Query<ListExportsQuery>,
) -> Result<Json<ExportPage>, ApiError> {
    let page = state.ledger.list_exports(user.user_id, &query).await?;
    Ok(Json(page))
}

/// Export one chart for the caller.
///
/// POST /api/v1/exports
pub async fn create_export(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<CreateExportRequest>,
) -> Result<(StatusCode, Json<ExportResponse>), ApiError> {
    let filters = match request.filters {
        Some(filters) => filters,
        None => {
            let store = state.filters.get(user.user_id).await;
            let filters = store.lock().await.get().clone();
            filters
        }
    };

    let record = state
        .exports
        .export(user.user_id, request.kind, &filters, request.format)
        .await?;

    info!(
        user_id = %user.user_id,
        export_id = %record.id,
        chart = %request.kind,
        "Export created"
    );
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Issue a time-limited download link for a completed export.
///
/// POST /api/v1/exports/:id/download
pub async fn create_download(
    State(state): State<AppState>,
    user: UserContext,
    Path(export_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DownloadLinkResponse>), ApiError> {
    let issued = state.ledger.create_download(user.user_id, export_id).await?;
    let download_url = format!("/api/v1/downloads/{}", issued.token);
    Ok((
        StatusCode::CREATED,
        Json(DownloadLinkResponse {
            issued,
            download_url,
        }),
    ))
}

/// POST /api/v1/exports/bulk-delete
pub async fn bulk_delete(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<BulkExportRequest>,
) -> Result<Json<BulkExportResponse>, ApiError> {
    request.validate()?;
    let affected = state
        .ledger
        .bulk_delete(user.user_id, &request.export_ids)
        .await?;
    Ok(Json(BulkExportResponse {
        requested: request.export_ids.len(),
        affected,
    }))
}

/// POST /api/v1/exports/bulk-archive
pub async fn bulk_archive(
    State(state): State<AppState>,
    user: UserContext,
    Json(request): Json<BulkExportRequest>,
) -> Result<Json<BulkExportResponse>, ApiError> {
    request.validate()?;
    let affected = state
        .ledger
        .bulk_archive(user.user_id, &request.export_ids)
        .await?;
    Ok(Json(BulkExportResponse {
        requested: request.export_ids.len(),
        affected,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_create_request_defaults_to_json() {
        let request: CreateExportRequest =
            serde_json::from_value(json!({"kind": "summary"})).unwrap();
        assert_eq!(request.kind, ChartKind::Summary);
        assert_eq!(request.format, ExportFormat::Json);
        assert!(request.filters.is_none());
    }

    #[test]
    fn test_download_link_is_flattened() {
        let response = DownloadLinkResponse {
            issued: IssuedDownload {
                download_id: Uuid::nil(),
                token: "abc".to_string(),
                expires_at: Utc::now(),
            },
            download_url: "/api/v1/downloads/abc".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["token"], "abc");
        assert_eq!(json["downloadUrl"], "/api/v1/downloads/abc");
        assert!(json.get("issued").is_none());
    }
}
