//! Financial summary
//! Rent and expense totals over the scoped tables

use super::{Database, WhereClause};
use crate::auth::gate::OrgScope;
use anyhow::{Context, Result};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection};
use serde::{Deserialize, Serialize};

/// Inclusive `YYYY-MM-DD` bounds.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct DateRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialSummary {
    pub rent_collected: f64,
    pub rent_outstanding: f64,
    pub expenses: f64,
    pub net_income: f64,
    pub payments_count: u64,
    pub expenses_count: u64,
    pub from: Option<String>,
    pub to: Option<String>,
}

fn bounded(scope: &OrgScope, date_expr: &str, range: &DateRange) -> WhereClause {
    let mut clause = WhereClause::new();
    clause.scope("organization_id", scope);
    if let Some(from) = &range.from {
        clause.cond(&format!("substr({}, 1, 10) >= ?", date_expr), SqlValue::Text(from.clone()));
    }
    if let Some(to) = &range.to {
        clause.cond(&format!("substr({}, 1, 10) <= ?", date_expr), SqlValue::Text(to.clone()));
    }
    clause
}

fn sum_and_count(conn: &Connection, table: &str, clause: &WhereClause) -> Result<(f64, u64)> {
    let (sum, count): (f64, i64) = conn
        .query_row(
            &format!(
                "SELECT COALESCE(SUM(amount), 0.0), COUNT(*) FROM {}{}",
                table,
                clause.sql()
            ),
            params_from_iter(clause.params()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .with_context(|| format!("Failed to total {}", table))?;
    Ok((sum, count as u64))
}

impl Database {
    /// Paid rent is dated by `paid_date` (falling back to `due_date`);
    /// outstanding rent (`pending` or `late`) by `due_date`; expenses by
    /// `incurred_on`.
    pub async fn financial_summary(&self, scope: &OrgScope, range: &DateRange) -> Result<FinancialSummary> {
        let conn = self.conn().await;

        let mut paid = bounded(scope, "COALESCE(paid_date, due_date)", range);
        paid.cond("status = ?", SqlValue::Text("paid".into()));
        let (rent_collected, payments_count) = sum_and_count(&conn, "rent_payments", &paid)?;

        let mut pending = bounded(scope, "due_date", range);
        pending.raw("status IN ('pending', 'late')");
        let (rent_outstanding, _) = sum_and_count(&conn, "rent_payments", &pending)?;

        let spent = bounded(scope, "incurred_on", range);
        let (expenses, expenses_count) = sum_and_count(&conn, "expenses", &spent)?;

        Ok(FinancialSummary {
            rent_collected,
            rent_outstanding,
            expenses,
            net_income: rent_collected - expenses,
            payments_count,
            expenses_count,
            from: range.from.clone(),
            to: range.to.clone(),
        })
    }
}
