//! Scoped resource endpoints
//!
//! Five routes per catalog entry, all sharing one set of handlers. Collection
//! handlers run the endpoint gate up front. Single-record handlers look the
//! id up first, so a missing id is `NotFound` for every caller, and then run
//! the gate against the record's organization.

use super::{created, json_object, ok, optional_str, page_request, paginated, AppState};
use crate::auth::Caller;
use crate::db::records::query_filters;
use crate::error::ApiError;
use crate::models::{ResourceSpec, CATALOG};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    CATALOG.iter().fold(Router::new(), |router, spec| {
        let spec: &'static ResourceSpec = spec;
        router
            .route(
                &format!("/api/{}", spec.name),
                get(
                    move |state: State<AppState>,
                          caller: Caller,
                          query: Query<HashMap<String, String>>| {
                        list(spec, state, caller, query)
                    },
                )
                .post(
                    move |state: State<AppState>,
                          caller: Caller,
                          payload: Result<Json<Value>, JsonRejection>| {
                        create(spec, state, caller, payload)
                    },
                ),
            )
            .route(
                &format!("/api/{}/:id", spec.name),
                get(
                    move |state: State<AppState>, caller: Caller, id: Path<String>| {
                        fetch(spec, state, caller, id)
                    },
                )
                .patch(
                    move |state: State<AppState>,
                          caller: Caller,
                          id: Path<String>,
                          payload: Result<Json<Value>, JsonRejection>| {
                        update(spec, state, caller, id, payload)
                    },
                )
                .delete(
                    move |state: State<AppState>, caller: Caller, id: Path<String>| {
                        remove(spec, state, caller, id)
                    },
                ),
            )
    })
}

async fn list(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy(&spec.policy_key("read")), None)?;

    let page = page_request(&query)?;
    let filters = query_filters(spec, &query)?;
    let scope = caller.scope(query.get("organization_id").map(String::as_str));

    let (rows, total) = state.db.list_records(spec, &scope, &filters, page).await?;
    Ok(paginated(rows, total, page))
}

async fn fetch(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy(&spec.policy_key("read"));
    let record = state
        .db
        .get_record(spec, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(spec.label, &id))?;
    caller.authorize(policy, record.get("organization_id").and_then(Value::as_str))?;

    Ok(ok(record))
}

/// The target organization is the body's `organization_id` when given,
/// otherwise the caller's own.
async fn create(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy(&spec.policy_key("create"));
    caller.authorize(policy, None)?;

    let body = json_object(payload)?;
    let target = optional_str(&body, "organization_id")?
        .or(caller.org())
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_field("organization_id", "is required"))?;
    caller.authorize(policy, Some(&target))?;

    let assignments = spec.validate_create(&body)?;
    let record = state
        .db
        .insert_record(spec, &target, &assignments, Some(&caller.identity_id))
        .await?;

    Ok(created(record))
}

async fn update(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy(&spec.policy_key("update"));
    let org = state
        .db
        .record_organization(spec, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(spec.label, &id))?;
    caller.authorize(policy, Some(&org))?;

    let body = json_object(payload)?;
    let assignments = spec.validate_update(&body)?;
    let record = state
        .db
        .update_record(spec, &id, &assignments, Some(&caller.identity_id))
        .await?
        .ok_or_else(|| ApiError::not_found(spec.label, &id))?;

    Ok(ok(record))
}

async fn remove(
    spec: &'static ResourceSpec,
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy(&spec.policy_key("delete"));
    let org = state
        .db
        .record_organization(spec, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(spec.label, &id))?;
    caller.authorize(policy, Some(&org))?;

    if !state
        .db
        .delete_record(spec, &id, Some(&caller.identity_id))
        .await?
    {
        return Err(ApiError::not_found(spec.label, &id));
    }

    Ok(ok(json!({ "id": id, "deleted": true })))
}
