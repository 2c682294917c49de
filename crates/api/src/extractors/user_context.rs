//! Caller identity extractor.
//!
//! Authentication is terminated upstream; the gateway forwards the
//! authenticated user's id in `X-User-Id`. Filter sessions, exports and
//! download quotas are all keyed by this id.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user a request acts on behalf of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: Uuid,
}

impl UserContext {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let raw = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing user identity".to_string()))?;

        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|_| ApiError::Unauthorized("Invalid user identity".to_string()))?;

        if user_id.is_nil() {
            return Err(ApiError::Unauthorized("Invalid user identity".to_string()));
        }

        Ok(Self { user_id })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_valid_user_id() {
        let id = Uuid::new_v4();
        let ctx = UserContext::from_headers(&headers(&id.to_string())).unwrap();
        assert_eq!(ctx.user_id, id);
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let result = UserContext::from_headers(&HeaderMap::new());
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_malformed_and_nil_ids_are_rejected() {
        for value in ["not-a-uuid", "", "00000000-0000-0000-0000-000000000000"] {
            let result = UserContext::from_headers(&headers(value));
            assert!(
                matches!(result, Err(ApiError::Unauthorized(_))),
                "{value:?} should be rejected"
            );
        }
    }
}
