//! User administration
//! Identities are listed and edited within the caller's organization;
//! role bindings are granted and withdrawn here.

use super::{json_object, ok, only_fields, optional_str, page_request, paginated, AppState};
use crate::auth::gate::{Denial, RoutePolicy};
use crate::auth::models::{Identity, IdentityStatus, Role, OVERRIDE_ROLE};
use crate::auth::Caller;
use crate::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users))
        .route("/api/users/:id", get(get_user).patch(update_user))
        .route("/api/users/:id/roles", post(assign_role))
        .route("/api/users/:id/roles/:role", delete(revoke_role))
}

/// Identities without an organization are only visible to the override role.
fn authorize_identity(caller: &Caller, policy: &RoutePolicy, identity: &Identity) -> Result<(), ApiError> {
    match identity.organization_id.as_deref() {
        Some(org) => caller.authorize(policy, Some(org)),
        None if caller.is_override() => Ok(()),
        None => {
            caller.authorize(policy, None)?;
            Err(Denial::OrganizationMismatch.into())
        }
    }
}

/// Existence first, then the gate against the identity's organization.
async fn load_target(state: &AppState, caller: &Caller, policy: &RoutePolicy, id: &str) -> Result<Identity, ApiError> {
    let identity = state
        .db
        .get_identity(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User", id))?;
    authorize_identity(caller, policy, &identity)?;
    Ok(identity)
}

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    Role::parse(raw).ok_or_else(|| {
        ApiError::invalid_field(
            "role",
            format!(
                "must be one of {}",
                Role::ALL.map(|r| r.as_str()).join(", ")
            ),
        )
    })
}

async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy("users.read"), None)?;

    let page = page_request(&query)?;
    let status = match query.get("status") {
        Some(raw) => Some(
            IdentityStatus::parse(raw)
                .ok_or_else(|| ApiError::invalid_field("status", "must be active, suspended or invited"))?,
        ),
        None => None,
    };
    let scope = caller.scope(query.get("organization_id").map(String::as_str));

    let (rows, total) = state.db.list_identities(&scope, status, page).await?;
    Ok(paginated(rows, total, page))
}

async fn get_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("users.read");
    let identity = load_target(&state, &caller, policy, &id).await?;
    let bindings = state.db.list_bindings(&identity.id).await?;

    Ok(ok(json!({ "user": identity, "bindings": bindings })))
}

async fn update_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("users.update");
    load_target(&state, &caller, policy, &id).await?;
    if !caller.is_override() && state.db.resolve_roles(&id).await?.contains(&OVERRIDE_ROLE) {
        return Err(ApiError::Forbidden(format!(
            "Only {} may modify a {} account",
            OVERRIDE_ROLE, OVERRIDE_ROLE
        )));
    }

    let body = json_object(payload)?;
    only_fields(&body, &["full_name", "status"])?;
    let full_name = optional_str(&body, "full_name")?;
    if full_name.is_some_and(|n| n.trim().is_empty()) {
        return Err(ApiError::invalid_field("full_name", "must not be empty"));
    }
    let status = match optional_str(&body, "status")? {
        Some(raw) => Some(
            IdentityStatus::parse(raw)
                .ok_or_else(|| ApiError::invalid_field("status", "must be active, suspended or invited"))?,
        ),
        None => None,
    };
    if full_name.is_none() && status.is_none() {
        return Err(ApiError::validation("No fields to update"));
    }
    if id == caller.identity_id && status.is_some_and(|s| s != IdentityStatus::Active) {
        return Err(ApiError::invalid_field("status", "cannot deactivate your own account"));
    }

    let identity = state
        .db
        .update_identity(&id, full_name, status, Some(&caller.identity_id))
        .await?
        .ok_or_else(|| ApiError::not_found("User", &id))?;
    Ok(ok(identity))
}

/// Body: `{role, organization_id?}`. Non-override callers always bind in
/// their own organization; `super_admin` bindings carry no organization.
async fn assign_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("roles.assign");
    let identity = load_target(&state, &caller, policy, &id).await?;

    let body = json_object(payload)?;
    only_fields(&body, &["role", "organization_id"])?;
    let role = parse_role(
        optional_str(&body, "role")?.ok_or_else(|| ApiError::invalid_field("role", "is required"))?,
    )?;
    if role == Role::SuperAdmin && !caller.is_override() {
        return Err(ApiError::Forbidden("Only super_admin may grant super_admin".to_string()));
    }

    let organization_id = if role == Role::SuperAdmin {
        None
    } else if caller.is_override() {
        optional_str(&body, "organization_id")?
            .map(str::to_string)
            .or(identity.organization_id.clone())
    } else {
        caller.organization_id.clone()
    };
    if role != Role::SuperAdmin && organization_id.is_none() {
        return Err(ApiError::invalid_field("organization_id", "is required"));
    }

    let inserted = state
        .db
        .bind_role(&id, role, organization_id.as_deref(), Some(&caller.identity_id))
        .await?;
    info!(identity_id = %id, role = %role, by = %caller.identity_id, inserted, "Role assigned");

    let bindings = state.db.list_bindings(&id).await?;
    let status = if inserted { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, ok(bindings)))
}

async fn revoke_role(
    State(state): State<AppState>,
    caller: Caller,
    Path((id, role)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("roles.assign");
    load_target(&state, &caller, policy, &id).await?;
    let role = parse_role(&role)?;
    if role == Role::SuperAdmin && !caller.is_override() {
        return Err(ApiError::Forbidden("Only super_admin may revoke super_admin".to_string()));
    }

    // override callers remove the role everywhere
    let scope = if caller.is_override() {
        None
    } else {
        Some(caller.org())
    };
    let removed = state
        .db
        .unbind_role(&id, role, scope, Some(&caller.identity_id))
        .await?;
    if removed == 0 {
        return Err(ApiError::NotFound(format!("User {} has no {} binding", id, role)));
    }
    info!(identity_id = %id, role = %role, by = %caller.identity_id, removed, "Role revoked");

    Ok(ok(state.db.list_bindings(&id).await?))
}
