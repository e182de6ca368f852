//! Authentication Middleware
//! Mission: Turn a bearer token into a freshly resolved caller

use crate::api::AppState;
use crate::auth::gate::{self, OrgScope, RoutePolicy};
use crate::auth::models::{IdentityStatus, RoleSet};
use crate::error::ApiError;
use crate::middleware::AuthenticatedIdentity;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

/// The authenticated principal of one request. Roles are re-read from the
/// store on every request, never taken from the token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub identity_id: String,
    pub email: String,
    pub organization_id: Option<String>,
    pub roles: RoleSet,
}

impl Caller {
    pub fn is_override(&self) -> bool {
        gate::is_override(&self.roles)
    }

    pub fn org(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// Runs the scope gate for this caller.
    pub fn authorize(&self, policy: &RoutePolicy, resource_org: Option<&str>) -> Result<(), ApiError> {
        gate::authorize(&self.roles, policy, self.org(), resource_org).map_err(|denial| {
            debug!(
                identity_id = %self.identity_id,
                allow = ?policy.allow,
                resource_org,
                reason = %denial,
                "Authorization denied"
            );
            ApiError::from(denial)
        })
    }

    pub fn scope(&self, requested: Option<&str>) -> OrgScope {
        gate::list_scope(&self.roles, self.org(), requested)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validates the bearer token, reloads the identity and its roles, and puts
/// a [`Caller`] into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = {
        let token = bearer_token(req.headers())
            .ok_or_else(|| ApiError::Unauthorized("Missing authorization token".to_string()))?;
        state.jwt.validate_token(token, Utc::now().timestamp())?
    };

    let identity = state
        .db
        .get_identity(&claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown identity".to_string()))?;
    if identity.status != IdentityStatus::Active {
        debug!(identity_id = %identity.id, status = identity.status.as_str(), "Inactive identity rejected");
        return Err(ApiError::Unauthorized("Account is not active".to_string()));
    }

    let roles = state.db.resolve_roles(&identity.id).await?;
    let logged = AuthenticatedIdentity(identity.id.clone());

    req.extensions_mut().insert(Caller {
        identity_id: identity.id,
        email: identity.email,
        organization_id: identity.organization_id,
        roles,
    });

    let mut response = next.run(req).await;
    response.extensions_mut().insert(logged);
    Ok(response)
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
    }
}
