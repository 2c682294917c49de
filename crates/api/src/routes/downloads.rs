//! Public download endpoint.
//!
//! The token in the path is the only credential. Every failure mode
//! (unknown, expired, revoked, file gone) answers the same 404.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::ApiError;

fn not_available() -> ApiError {
    ApiError::NotFound("Export not available".to_string())
}

fn content_disposition(file_name: &str) -> HeaderValue {
    let safe: String = file_name
        .chars()
        .filter(|c| c.is_ascii_graphic() && *c != '"' && *c != '\\')
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", safe))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Stream an export artifact.
///
/// GET /api/v1/downloads/:token
pub async fn download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let resolved = state.ledger.resolve_token(&token).await?;

    let file = match tokio::fs::File::open(&resolved.path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(export_id = %resolved.export.id, "Export file missing at download");
            return Err(not_available());
        }
        Err(e) => return Err(ApiError::Internal(format!("Failed to open export: {}", e))),
    };
    let length = file.metadata().await.ok().map(|m| m.len());

    let token = state.ledger.mark_downloaded(resolved.token.id).await?;
    info!(
        export_id = %resolved.export.id,
        download_id = %token.id,
        download_count = token.download_count,
        "Export downloaded"
    );

    let file_name = resolved.export.file_name().unwrap_or("export");
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(resolved.export.format.content_type()),
    );
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(file_name));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_strips_quotes() {
        let value = content_disposition("summary-\"x\".json");
        assert_eq!(value, "attachment; filename=\"summary-x.json\"");
    }

    #[test]
    fn test_content_disposition_drops_spaces() {
        let value = content_disposition("my export.json");
        assert_eq!(value, "attachment; filename=\"myexport.json\"");
    }
}
