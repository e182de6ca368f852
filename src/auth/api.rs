//! Authentication API Endpoints
//! Mission: Onboarding, login and the current caller's profile

use crate::api::{created, ok, AppState};
use crate::auth::middleware::Caller;
use crate::auth::models::{
    Identity, IdentityStatus, LoginRequest, LoginResponse, RegisterRequest, Role, RoleSet,
};
use crate::error::{ApiError, FieldErrors};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn check_password(password: &str, errors: &mut FieldErrors) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.insert(
            "password".to_string(),
            format!("must be at least {} characters", MIN_PASSWORD_LEN),
        );
    }
}

pub(crate) fn check_email(email: &str, errors: &mut FieldErrors) {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        errors.insert("email".to_string(), "must be a valid email address".to_string());
    }
}

pub(crate) fn check_required(field: &str, value: &str, errors: &mut FieldErrors) {
    if value.trim().is_empty() {
        errors.insert(field.to_string(), "is required".to_string());
    }
}

pub(crate) fn issue_login(state: &AppState, identity: Identity, roles: RoleSet) -> Result<LoginResponse, ApiError> {
    let (token, expires_in) = state.jwt.issue(&identity, &roles, Utc::now().timestamp())?;
    Ok(LoginResponse {
        token,
        expires_in,
        user: identity,
        roles: roles.into_iter().collect(),
    })
}

/// Register endpoint - POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let mut errors = FieldErrors::new();
    check_email(&payload.email, &mut errors);
    check_password(&payload.password, &mut errors);
    check_required("full_name", &payload.full_name, &mut errors);
    check_required("organization_name", &payload.organization_name, &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::invalid_fields(errors));
    }

    let (org, identity) = state
        .db
        .register_organization(
            &payload.organization_name,
            &payload.email,
            &payload.password,
            &payload.full_name,
        )
        .await?;

    info!(identity_id = %identity.id, organization_id = %org.id, "Registered organization");

    let roles: RoleSet = [Role::PmcAdmin].into_iter().collect();
    let login = issue_login(&state, identity, roles)?;
    Ok(created(json!({ "organization": org, "session": login })))
}

/// Login endpoint - POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let identity = match state
        .db
        .verify_credentials(&payload.email, &payload.password)
        .await?
    {
        Some(identity) => identity,
        None => {
            warn!(email = %payload.email.trim(), "Failed login attempt");
            return Err(ApiError::Unauthorized("Invalid email or password".to_string()));
        }
    };

    if identity.status != IdentityStatus::Active {
        warn!(identity_id = %identity.id, status = identity.status.as_str(), "Login by inactive identity");
        return Err(ApiError::Unauthorized("Account is not active".to_string()));
    }

    let roles = state.db.resolve_roles(&identity.id).await?;
    info!(identity_id = %identity.id, roles = roles.len(), "Login successful");

    Ok(ok(issue_login(&state, identity, roles)?))
}

/// Current caller - GET /api/auth/me
pub async fn me(State(state): State<AppState>, caller: Caller) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .db
        .get_identity(&caller.identity_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown identity".to_string()))?;
    let bindings = state.db.list_bindings(&caller.identity_id).await?;

    Ok(ok(json!({
        "user": identity,
        "roles": caller.roles,
        "bindings": bindings,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_checks() {
        let mut errors = FieldErrors::new();
        check_email("someone@example.com", &mut errors);
        check_password("long enough", &mut errors);
        check_required("full_name", "Ann", &mut errors);
        assert!(errors.is_empty());

        check_email("nope", &mut errors);
        check_email("a@b", &mut errors);
        check_password("short", &mut errors);
        check_required("full_name", "   ", &mut errors);
        assert_eq!(errors.len(), 3);
        assert!(errors.contains_key("email"));
        assert!(errors.contains_key("password"));
        assert!(errors.contains_key("full_name"));
    }
}
