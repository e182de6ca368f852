//! Organization endpoints
//! An organization's scope id is its own id; deletion archives it.

use super::{created, json_object, ok, only_fields, optional_str, page_request, paginated, AppState};
use crate::auth::Caller;
use crate::db::organizations::ORG_STATUSES;
use crate::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/organizations", get(list_organizations).post(create_organization))
        .route(
            "/api/organizations/:id",
            get(get_organization)
                .patch(update_organization)
                .delete(archive_organization),
        )
}

fn check_status(status: Option<&str>) -> Result<(), ApiError> {
    match status {
        Some(s) if !ORG_STATUSES.contains(&s) => Err(ApiError::invalid_field(
            "status",
            format!("must be one of {}", ORG_STATUSES.join(", ")),
        )),
        _ => Ok(()),
    }
}

async fn list_organizations(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy("organizations.read"), None)?;

    let page = page_request(&query)?;
    let status = query.get("status").map(String::as_str);
    check_status(status)?;
    let scope = caller.scope(query.get("organization_id").map(String::as_str));

    let (rows, total) = state.db.list_organizations(&scope, status, page).await?;
    Ok(paginated(rows, total, page))
}

async fn create_organization(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy("organizations.create"), None)?;

    let body = json_object(payload)?;
    only_fields(&body, &["name"])?;
    let name = optional_str(&body, "name")?
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::invalid_field("name", "is required"))?;

    let org = state
        .db
        .create_organization(name, Some(&caller.identity_id))
        .await?;
    Ok(created(org))
}

async fn get_organization(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("organizations.read");
    let org = state
        .db
        .get_organization(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization", &id))?;
    caller.authorize(policy, Some(&org.id))?;

    Ok(ok(org))
}

async fn update_organization(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("organizations.update");
    if state.db.get_organization(&id).await?.is_none() {
        return Err(ApiError::not_found("Organization", &id));
    }
    caller.authorize(policy, Some(&id))?;

    let body = json_object(payload)?;
    only_fields(&body, &["name", "status"])?;
    let name = optional_str(&body, "name")?;
    let status = optional_str(&body, "status")?;
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::invalid_field("name", "must not be empty"));
    }
    check_status(status)?;
    if name.is_none() && status.is_none() {
        return Err(ApiError::validation("No fields to update"));
    }

    let org = state
        .db
        .update_organization(&id, name, status, Some(&caller.identity_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Organization", &id))?;
    Ok(ok(org))
}

async fn archive_organization(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("organizations.delete");
    if state.db.get_organization(&id).await?.is_none() {
        return Err(ApiError::not_found("Organization", &id));
    }
    caller.authorize(policy, Some(&id))?;

    let org = state
        .db
        .update_organization(&id, None, Some("archived"), Some(&caller.identity_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Organization", &id))?;
    Ok(ok(org))
}
