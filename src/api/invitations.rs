//! Invitation endpoints
//! Staff invite by email and role; the invitee redeems the token publicly.

use super::{created, json_object, ok, only_fields, optional_str, page_request, paginated, AppState};
use crate::auth::api::{check_email, check_password, check_required, issue_login};
use crate::auth::models::Role;
use crate::auth::Caller;
use crate::db::invitations::{Acceptance, ACCEPTED, PENDING, REVOKED};
use crate::error::{ApiError, FieldErrors};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/invitations", get(list_invitations).post(create_invitation))
        .route("/api/invitations/:id", delete(revoke_invitation))
}

async fn list_invitations(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy("invitations.read"), None)?;

    let page = page_request(&query)?;
    let status = query.get("status").map(String::as_str);
    if let Some(status) = status {
        if ![PENDING, ACCEPTED, REVOKED].contains(&status) {
            return Err(ApiError::invalid_field("status", "must be pending, accepted or revoked"));
        }
    }
    let scope = caller.scope(query.get("organization_id").map(String::as_str));

    let (rows, total) = state.db.list_invitations(&scope, status, page).await?;
    Ok(paginated(rows, total, page))
}

/// Body: `{email, role, organization_id?}`. The token is returned only here.
async fn create_invitation(
    State(state): State<AppState>,
    caller: Caller,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("invitations.create");
    caller.authorize(policy, None)?;

    let body = json_object(payload)?;
    let target = optional_str(&body, "organization_id")?
        .or(caller.org())
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_field("organization_id", "is required"))?;
    caller.authorize(policy, Some(&target))?;

    only_fields(&body, &["email", "role", "organization_id"])?;
    let mut errors = FieldErrors::new();
    let email = optional_str(&body, "email")?.unwrap_or_default();
    check_email(email, &mut errors);
    let role = match optional_str(&body, "role")?.map(Role::parse) {
        Some(Some(Role::SuperAdmin)) => {
            errors.insert("role".to_string(), "cannot be granted by invitation".to_string());
            None
        }
        Some(Some(role)) => Some(role),
        _ => {
            errors.insert("role".to_string(), "must be a valid role".to_string());
            None
        }
    };
    let Some(role) = role.filter(|_| errors.is_empty()) else {
        return Err(ApiError::invalid_fields(errors));
    };

    if role == Role::PmcAdmin && !caller.is_override() && !caller.roles.contains(&Role::PmcAdmin) {
        return Err(ApiError::Forbidden("Only pmc_admin may invite pmc_admin".to_string()));
    }

    let invitation = state
        .db
        .create_invitation(&target, email, role, &caller.identity_id, state.invitation_ttl)
        .await?;
    let token = invitation.token.clone();

    Ok(created(json!({ "invitation": invitation, "token": token })))
}

async fn revoke_invitation(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let policy = state.policy("invitations.revoke");
    let invitation = state
        .db
        .get_invitation(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation", &id))?;
    caller.authorize(policy, Some(&invitation.organization_id))?;

    let revoked = state
        .db
        .revoke_invitation(&id, Some(&caller.identity_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation", &id))?;
    Ok(ok(revoked))
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub token: String,
    pub password: String,
    pub full_name: String,
}

/// Accept endpoint - POST /api/invitations/accept (public)
pub async fn accept(
    State(state): State<AppState>,
    payload: Result<Json<AcceptRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;

    let mut errors = FieldErrors::new();
    check_required("token", &payload.token, &mut errors);
    check_password(&payload.password, &mut errors);
    check_required("full_name", &payload.full_name, &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::invalid_fields(errors));
    }

    let (identity, invitation) = state
        .db
        .accept_invitation(
            &Acceptance {
                token: payload.token.trim(),
                password: &payload.password,
                full_name: &payload.full_name,
            },
            Utc::now(),
        )
        .await?;

    let roles = state.db.resolve_roles(&identity.id).await?;
    let session = issue_login(&state, identity, roles)?;
    Ok(created(json!({ "invitation": invitation, "session": session })))
}
