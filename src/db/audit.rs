//! Audit trail
//! Append-only log of every mutation, written in the same transaction as the change

use super::{new_id, now_timestamp, paginate, Database, PageRequest, WhereClause};
use crate::auth::gate::OrgScope;
use anyhow::{Context, Result};
use rusqlite::{params, types::Value as SqlValue, Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub organization_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub changes: Option<Value>,
    pub created_at: String,
}

/// What happened, to which row, by whom.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub organization_id: Option<&'a str>,
    pub actor_id: Option<&'a str>,
    pub action: &'a str,
    pub resource: &'a str,
    pub resource_id: &'a str,
    pub changes: Option<Value>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuditFilter {
    pub resource: Option<String>,
    pub resource_id: Option<String>,
    pub actor_id: Option<String>,
}

/// Writes on the caller's connection so the entry commits with the change.
pub(crate) fn append(conn: &Connection, entry: &AuditEntry<'_>) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_log (id, organization_id, actor_id, action, resource, resource_id, changes, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            new_id(),
            entry.organization_id,
            entry.actor_id,
            entry.action,
            entry.resource,
            entry.resource_id,
            entry.changes.as_ref().map(|c| c.to_string()),
            now_timestamp(),
        ],
    )
    .context("Failed to append audit entry")?;
    Ok(())
}

fn map_audit(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let changes: Option<String> = row.get(6)?;
    Ok(AuditRecord {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        actor_id: row.get(2)?,
        action: row.get(3)?,
        resource: row.get(4)?,
        resource_id: row.get(5)?,
        changes: changes.and_then(|c| serde_json::from_str(&c).ok()),
        created_at: row.get(7)?,
    })
}

impl Database {
    pub async fn list_audit(
        &self,
        scope: &OrgScope,
        filter: &AuditFilter,
        page: PageRequest,
    ) -> Result<(Vec<AuditRecord>, u64)> {
        let mut clause = WhereClause::new();
        clause.scope("organization_id", scope);
        if let Some(resource) = &filter.resource {
            clause.eq("resource", SqlValue::Text(resource.clone()));
        }
        if let Some(resource_id) = &filter.resource_id {
            clause.eq("resource_id", SqlValue::Text(resource_id.clone()));
        }
        if let Some(actor_id) = &filter.actor_id {
            clause.eq("actor_id", SqlValue::Text(actor_id.clone()));
        }

        let conn = self.conn().await;
        paginate(
            &conn,
            "audit_log",
            "id, organization_id, actor_id, action, resource, resource_id, changes, created_at",
            &clause,
            page,
            map_audit,
        )
    }
}
