//! Reporting endpoints

use super::{ok, AppState};
use crate::auth::Caller;
use crate::db::reports::DateRange;
use crate::error::{ApiError, FieldErrors};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use std::collections::HashMap;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/reports/financial-summary", get(financial_summary))
}

fn date_range(query: &HashMap<String, String>) -> Result<DateRange, ApiError> {
    let mut errors = FieldErrors::new();
    let mut bound = |key: &str| -> Option<String> {
        let raw = query.get(key)?;
        match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
            Err(_) => {
                errors.insert(key.to_string(), "must be a date (YYYY-MM-DD)".to_string());
                None
            }
        }
    };
    let range = DateRange {
        from: bound("from"),
        to: bound("to"),
    };

    if !errors.is_empty() {
        return Err(ApiError::invalid_fields(errors));
    }
    if let (Some(from), Some(to)) = (&range.from, &range.to) {
        if from > to {
            return Err(ApiError::invalid_field("from", "must not be after to"));
        }
    }
    Ok(range)
}

/// GET /api/reports/financial-summary?from=&to=&organization_id=
async fn financial_summary(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize(state.policy("reports.read"), None)?;

    let range = date_range(&query)?;
    let scope = caller.scope(query.get("organization_id").map(String::as_str));

    let summary = state.db.financial_summary(&scope, &range).await?;
    Ok(ok(summary))
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
    fn test_date_range_parsing() {
        let range = date_range(&query(&[("from", "2024-01-01"), ("to", "2024-03-31")])).unwrap();
        assert_eq!(range.from.as_deref(), Some("2024-01-01"));
        assert_eq!(range.to.as_deref(), Some("2024-03-31"));

        assert!(date_range(&query(&[])).unwrap().from.is_none());
        assert!(date_range(&query(&[("from", "yesterday")])).is_err());
        assert!(date_range(&query(&[("from", "2024-05-01"), ("to", "2024-01-01")])).is_err());
    }
}
