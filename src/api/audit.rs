//! Audit trail endpoint

use super::{page_request, paginated, AppState};
use crate::auth::Caller;
use crate::db::audit::AuditFilter;
use crate::error::ApiError;
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/audit", get(list_audit))
}

async fn list_audit(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy("audit.read"), None)?;

    let page = page_request(&query)?;
    let filter = AuditFilter {
        resource: query.get("resource").cloned(),
        resource_id: query.get("resource_id").cloned(),
        actor_id: query.get("actor_id").cloned(),
    };
    let scope = caller.scope(query.get("organization_id").map(String::as_str));

    let (rows, total) = state.db.list_audit(&scope, &filter, page).await?;
    Ok(paginated(rows, total, page))
}
