//! HTTP error envelope
//!
//! Every failure leaves the service as `{success: false, error, details?}`
//! with the matching status code.

use crate::auth::gate::Denial;
use crate::auth::jwt::AuthError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response, Json},
};
use rusqlite::ffi;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Field name -> problem description.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn invalid_fields(fields: FieldErrors) -> Self {
        ApiError::Validation {
            message: "Validation failed".to_string(),
            details: Some(json!(fields)),
        }
    }

    pub fn invalid_field(field: &str, problem: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), problem.into());
        Self::invalid_fields(fields)
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{} {} not found", what, id))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Invalid => ApiError::Unauthorized("Invalid token".to_string()),
            AuthError::Expired => ApiError::Unauthorized("Token expired".to_string()),
        }
    }
}

impl From<Denial> for ApiError {
    fn from(denial: Denial) -> Self {
        ApiError::Forbidden(denial.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        anyhow::Error::from(err).into()
    }
}

/// Constraint violations become client errors; anything else is a store failure.
impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let constraint = err.chain().find_map(|cause| match cause.downcast_ref::<rusqlite::Error>() {
            Some(rusqlite::Error::SqliteFailure(e, msg)) if e.code == ffi::ErrorCode::ConstraintViolation => {
                Some((e.extended_code, msg.clone().unwrap_or_default()))
            }
            _ => None,
        });

        match constraint {
            Some((ffi::SQLITE_CONSTRAINT_UNIQUE, msg))
            | Some((ffi::SQLITE_CONSTRAINT_PRIMARYKEY, msg)) => {
                ApiError::Conflict(format!("Duplicate value ({})", msg))
            }
            Some((ffi::SQLITE_CONSTRAINT_FOREIGNKEY, _)) => {
                ApiError::validation("Referenced record does not exist")
            }
            _ => ApiError::Store(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, details) = match self {
            ApiError::Store(err) => {
                tracing::error!("Store error: {:#}", err);
                ("Internal server error".to_string(), None)
            }
            ApiError::Validation { message, details } => (message, details),
            other => (other.to_string(), None),
        };

        let mut body = json!({
            "success": false,
            "error": message,
        });
        if let Some(details) = details {
            body["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Unauthorized("x".into()).into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::validation("x").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Store(anyhow::anyhow!("disk on fire"))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_errors_are_unauthorized() {
        assert!(matches!(
            ApiError::from(AuthError::Expired),
            ApiError::Unauthorized(_)
        ));
        assert!(matches!(
            ApiError::from(AuthError::Invalid),
            ApiError::Unauthorized(_)
        ));
    }

    #[test]
    fn test_plain_anyhow_is_store_error() {
        let err: ApiError = anyhow::anyhow!("Test error").into();
        assert!(matches!(err, ApiError::Store(_)));
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (email TEXT UNIQUE)", []).unwrap();
        conn.execute("INSERT INTO t VALUES ('a')", []).unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .map_err(anyhow::Error::from)
            .map_err(|e| e.context("insert"))
            .unwrap_err();

        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));
    }
}
