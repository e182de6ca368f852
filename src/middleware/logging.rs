//! Request logging middleware.
//!
//! One line per request with method, path, status, latency and, once the
//! auth layer has run, the identity that made it. Every response carries an
//! `x-request-id` header matching the logged id.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Set on the response by the auth layer so the outer logger can name the caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity(pub String);

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let request_id = Uuid::new_v4().simple().to_string();
    let span = tracing::info_span!("http_request", request_id = %request_id);

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let latency_ms = start.elapsed().as_millis();
    let status = response.status();

    let identity = response
        .extensions()
        .get::<AuthenticatedIdentity>()
        .map(|i| i.0.clone())
        .unwrap_or_else(|| "-".to_string());

    let _entered = span.enter();
    match status {
        s if s.is_server_error() => warn!(
            method = %method,
            path = %path,
            status = s.as_u16(),
            latency_ms,
            identity = %identity,
            "Request failed (5xx)"
        ),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            identity = %identity,
            "Request denied"
        ),
        _ => info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            latency_ms,
            identity = %identity,
            "Request completed"
        ),
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
