//! Security headers middleware.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";

/// Header policy applied to every response.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeaders {
    /// Only enable behind TLS termination.
    pub hsts_enabled: bool,
}

/// Adds `X-Content-Type-Options`, `X-Frame-Options` and, when enabled,
/// `Strict-Transport-Security`. Export downloads are served through this
/// too, so browsers never sniff an artifact into something executable.
pub async fn security_headers_middleware(
    State(policy): State<SecurityHeaders>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );

    if policy.hsts_enabled {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS_VALUE),
        );
    }

    response
}
