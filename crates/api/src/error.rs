use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::models::FilterFieldError;
use domain::services::FetchError;
use domain::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::services::LedgerError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid filters: {} problem(s)", .0.len())]
    InvalidFilters(Vec<ValidationDetail>),

    #[error("Rate limited")]
    RateLimited,

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<ValidationDetail>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationDetail {
    pub field: String,
    pub message: String,
}

impl From<FilterFieldError> for ValidationDetail {
    fn from(err: FilterFieldError) -> Self {
        Self {
            field: err.field,
            message: err.message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, error_code, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::InvalidFilters(problems) => {
                let message = match problems.as_slice() {
                    [single] => single.message.clone(),
                    _ => format!("{} validation errors", problems.len()),
                };
                details = Some(problems);
                (StatusCode::BAD_REQUEST, "invalid_filters", message)
            }
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests. Please try again later.".into(),
            ),
            ApiError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "Chart data could not be loaded. Please retry.".into(),
                )
            }
            ApiError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".into(),
                )
            }
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        };

        let body = ErrorBody {
            error: error_code.into(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Validation(problems) => {
                ApiError::InvalidFilters(problems.into_iter().map(Into::into).collect())
            }
            FetchError::Source(msg) => ApiError::Upstream(msg),
            FetchError::Timeout(after) => {
                ApiError::Timeout(format!("Chart data took longer than {:?}", after))
            }
            FetchError::Cancelled => {
                ApiError::ServiceUnavailable("The chart request was cancelled".into())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(format!("Storage error: {}", err))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotAvailable => ApiError::NotFound("Export not available".into()),
            LedgerError::LimitReached(limit) => ApiError::Conflict(format!(
                "Download limit of {} active links reached",
                limit
            )),
            LedgerError::InvalidPath(path) => {
                tracing::warn!(path = %path, "Rejected export path");
                ApiError::NotFound("Export not available".into())
            }
            LedgerError::InvalidCursor => ApiError::Validation("Invalid pagination cursor".into()),
            LedgerError::UnsupportedFormat(format) => ApiError::Validation(format!(
                "Export format '{}' is not supported",
                format.as_str()
            )),
            LedgerError::Chart(err) => err.into(),
            LedgerError::Store(err) => err.into(),
            LedgerError::Io(err) => ApiError::Internal(format!("File error: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details: Vec<ValidationDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| ValidationDetail {
                    field: field.to_string(),
                    message: e.message.clone().map(|m| m.to_string()).unwrap_or_default(),
                })
            })
            .collect();

        let message = if details.len() == 1 {
            details[0].message.clone()
        } else {
            format!("{} validation errors", details.len())
        };

        ApiError::Validation(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ApiError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (ApiError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::ServiceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_fetch_validation_error_carries_details() {
        let error: ApiError = FetchError::Validation(vec![FilterFieldError {
            field: "date_range".into(),
            code: "date_order".into(),
            message: "Start date must be on or before end date".into(),
        }])
        .into();

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_filters");
        assert_eq!(body["details"][0]["field"], "date_range");
        assert!(body["message"].as_str().unwrap().contains("before end date"));
    }

    #[tokio::test]
    async fn test_internal_error_hides_message() {
        let body = body_json(ApiError::Internal("db password wrong".into()).into_response()).await;
        assert_eq!(body["message"], "An internal error occurred");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_ledger_errors_collapse_to_not_found() {
        for err in [
            LedgerError::NotAvailable,
            LedgerError::InvalidPath("../etc/passwd".into()),
        ] {
            let api: ApiError = err.into();
            assert!(matches!(api, ApiError::NotFound(ref m) if m == "Export not available"));
        }
    }

    #[test]
    fn test_fetch_timeout_maps_to_gateway_timeout() {
        let api: ApiError = FetchError::Timeout(std::time::Duration::from_secs(30)).into();
        assert_eq!(api.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
