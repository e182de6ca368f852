//! HTTP API
//! Mission: Route table, shared state and the response envelope

pub mod audit;
pub mod invitations;
pub mod organizations;
pub mod reports;
pub mod resources;
pub mod users;


use crate::auth::{api as auth_api, auth_middleware, gate::RoutePolicy, JwtHandler, PolicyTable};
use crate::db::{Database, PageRequest};
use crate::error::ApiError;
use crate::middleware::request_logging;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared handler state. Holds no per-request data and no caches.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jwt: Arc<JwtHandler>,
    pub policies: Arc<PolicyTable>,
    pub invitation_ttl: chrono::Duration,
}

impl AppState {
    pub fn policy(&self, key: &str) -> &RoutePolicy {
        self.policies.get(key)
    }
}

pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/login", post(auth_api::login))
        .route("/api/invitations/accept", post(invitations::accept));

    let protected_routes = Router::new()
        .route("/api/auth/me", get(auth_api::me))
        .merge(organizations::router())
        .merge(resources::router())
        .merge(users::router())
        .merge(invitations::router())
        .merge(audit::router())
        .merge(reports::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub fn ok<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, ok(data))
}

pub fn paginated<T: Serialize>(rows: Vec<T>, total: u64, page: PageRequest) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": rows,
        "pagination": {
            "page": page.page,
            "limit": page.limit,
            "total": total,
            "total_pages": page.total_pages(total),
        },
    }))
}

/// `page` must be a positive integer; `limit` is clamped to `1..=MAX_LIMIT`.
pub fn page_request(query: &HashMap<String, String>) -> Result<PageRequest, ApiError> {
    let mut page = PageRequest::default();

    if let Some(raw) = query.get("page") {
        page.page = raw
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ApiError::invalid_field("page", "must be a positive integer"))?;
    }
    if let Some(raw) = query.get("limit") {
        let limit = raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ApiError::invalid_field("limit", "must be a positive integer"))?;
        page.limit = limit.clamp(1, PageRequest::MAX_LIMIT);
    }

    Ok(page)
}

/// The body must be a JSON object.
pub fn json_object(payload: Result<Json<Value>, JsonRejection>) -> Result<Map<String, Value>, ApiError> {
    match payload? {
        Json(Value::Object(body)) => Ok(body),
        Json(_) => Err(ApiError::validation("Request body must be a JSON object")),
    }
}

/// Optional string field; `null` counts as absent.
pub fn optional_str<'a>(body: &'a Map<String, Value>, field: &str) -> Result<Option<&'a str>, ApiError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ApiError::invalid_field(field, "must be a string")),
    }
}

/// Fails with a field-level error for any key outside `allowed`.
pub fn only_fields(body: &Map<String, Value>, allowed: &[&str]) -> Result<(), ApiError> {
    let unknown: crate::error::FieldErrors = body
        .keys()
        .filter(|k| !allowed.contains(&k.as_str()))
        .map(|k| (k.clone(), "unknown field".to_string()))
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(ApiError::invalid_fields(unknown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_page_request_defaults_and_bounds() {
        assert_eq!(page_request(&query(&[])).unwrap(), PageRequest::default());
        assert_eq!(
            page_request(&query(&[("page", "3"), ("limit", "500")])).unwrap(),
            PageRequest { page: 3, limit: 100 }
        );
        assert_eq!(
            page_request(&query(&[("limit", "0")])).unwrap().limit,
            1
        );
        assert!(page_request(&query(&[("page", "0")])).is_err());
        assert!(page_request(&query(&[("page", "two")])).is_err());
        assert!(page_request(&query(&[("limit", "-5")])).is_err());
    }

    #[test]
    fn test_paginated_envelope() {
        let Json(body) = paginated(vec![1, 2], 45, PageRequest { page: 2, limit: 20 });
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], json!([1, 2]));
        assert_eq!(
            body["pagination"],
            json!({ "page": 2, "limit": 20, "total": 45, "total_pages": 3 })
        );
    }

    #[test]
    fn test_optional_str_and_only_fields() {
        let body = json!({ "name": "x", "status": null, "count": 3 });
        let body = body.as_object().unwrap();
        assert_eq!(optional_str(body, "name").unwrap(), Some("x"));
        assert_eq!(optional_str(body, "status").unwrap(), None);
        assert_eq!(optional_str(body, "missing").unwrap(), None);
        assert!(optional_str(body, "count").is_err());

        assert!(only_fields(body, &["name", "status", "count"]).is_ok());
        assert!(only_fields(body, &["name"]).is_err());
    }
}
