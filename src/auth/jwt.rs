//! JWT Token Handler
//! Issues and validates signed bearer tokens

use crate::auth::models::{Claims, Identity, RoleSet};
use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
}

/// JWT Handler for token operations
pub struct JwtHandler {
    secret: String,
    ttl_secs: i64,
}

impl JwtHandler {
    pub fn new(secret: String, ttl_hours: i64) -> Self {
        Self {
            secret,
            ttl_secs: ttl_hours * 3600,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Issue a token for `identity` at `now` (unix seconds).
    pub fn issue(&self, identity: &Identity, roles: &RoleSet, now: i64) -> Result<(String, i64)> {
        let claims = Claims {
            sub: identity.id.clone(),
            email: Some(identity.email.clone()),
            roles: Some(roles.iter().map(|r| r.as_str().to_string()).collect()),
            org_id: identity.organization_id.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };

        debug!(identity_id = %identity.id, exp = claims.exp, "Issuing JWT");

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("Failed to generate JWT")?;

        Ok((token, self.ttl_secs))
    }

    /// Decode and verify `token` against `now` (unix seconds).
    ///
    /// Expiry is checked here instead of by the decoder so the boundary is
    /// exact: a token whose `exp` equals `now` is already expired.
    pub fn validate_token(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            debug!(error = %e, "Rejected JWT");
            AuthError::Invalid
        })?;

        if now >= decoded.claims.exp {
            return Err(AuthError::Expired);
        }

        Ok(decoded.claims)
    }
}
