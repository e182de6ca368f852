//! Relational store
//!
//! One SQLite connection behind an async mutex. Each request performs its
//! own reads; nothing is cached between requests. Schema is created with
//! `CREATE TABLE IF NOT EXISTS` when the database is opened.

pub mod audit;
pub mod identities;
pub mod invitations;
pub mod organizations;
pub mod records;
pub mod reports;

use crate::auth::gate::OrgScope;
use crate::models::CATALOG;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, Row};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    hash_cost: u32,
}

impl Database {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            hash_cost: bcrypt::DEFAULT_COST,
        })
    }

    /// bcrypt work factor for new password hashes.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub(crate) async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fixed-width UTC timestamp, so text ordering matches time ordering.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `page`/`limit` window; `offset = (page - 1) * limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit.max(1)))
    }
}

/// AND-joined WHERE clause with positional parameters.
#[derive(Debug, Default)]
pub(crate) struct WhereClause {
    clauses: Vec<String>,
    params: Vec<SqlValue>,
}

impl WhereClause {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `column` must come from a static whitelist, never from input.
    pub(crate) fn eq(&mut self, column: &str, value: SqlValue) -> &mut Self {
        self.params.push(value);
        self.clauses.push(format!("{} = ?{}", column, self.params.len()));
        self
    }

    /// `clause` holds a single `?` placeholder for `value`.
    pub(crate) fn cond(&mut self, clause: &str, value: SqlValue) -> &mut Self {
        self.params.push(value);
        let numbered = clause.replacen('?', &format!("?{}", self.params.len()), 1);
        self.clauses.push(numbered);
        self
    }

    pub(crate) fn scope(&mut self, column: &str, scope: &OrgScope) -> &mut Self {
        match scope {
            OrgScope::All => {}
            OrgScope::Only(org) => {
                self.eq(column, SqlValue::Text(org.clone()));
            }
            OrgScope::Nothing => {
                self.raw("1 = 0");
            }
        }
        self
    }

    /// Literal condition without parameters.
    pub(crate) fn raw(&mut self, clause: &str) -> &mut Self {
        self.clauses.push(clause.to_string());
        self
    }

    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub(crate) fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Count plus one page of rows, newest first.
pub(crate) fn paginate<T>(
    conn: &Connection,
    table: &str,
    select: &str,
    filter: &WhereClause,
    page: PageRequest,
    mut map_row: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<(Vec<T>, u64)> {
    let where_sql = filter.sql();

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}{}", table, where_sql),
            params_from_iter(filter.params()),
            |row| row.get(0),
        )
        .with_context(|| format!("Failed to count {}", table))?;

    let n = filter.params().len();
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY created_at DESC, id DESC LIMIT ?{} OFFSET ?{}",
        select,
        table,
        where_sql,
        n + 1,
        n + 2
    );
    let window = [
        SqlValue::Integer(i64::from(page.limit)),
        SqlValue::Integer(page.offset() as i64),
    ];

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(filter.params().iter().chain(window.iter())), |row| {
            map_row(row)
        })?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to list {}", table))?;

    Ok((rows, total as u64))
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS organizations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_organizations_created ON organizations(created_at DESC);

        CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            full_name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            organization_id TEXT REFERENCES organizations(id),
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_identities_org ON identities(organization_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS role_bindings (
            identity_id TEXT NOT NULL REFERENCES identities(id),
            role TEXT NOT NULL,
            organization_id TEXT REFERENCES organizations(id),
            created_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_role_bindings_unique
            ON role_bindings(identity_id, role, IFNULL(organization_id, ''));

        CREATE TABLE IF NOT EXISTS invitations (
            id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL REFERENCES organizations(id),
            email TEXT NOT NULL,
            role TEXT NOT NULL,
            token TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL,
            invited_by TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            accepted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_invitations_org ON invitations(organization_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS audit_log (
            id TEXT PRIMARY KEY,
            organization_id TEXT,
            actor_id TEXT,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            resource_id TEXT NOT NULL,
            changes TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_org ON audit_log(organization_id, created_at DESC);",
    )
    .context("Failed to create core schema")?;

    for spec in CATALOG {
        let columns: String = spec
            .columns
            .iter()
            .map(|c| {
                format!(
                    "{} {}{},\n",
                    c.name,
                    c.sql_type(),
                    if c.required { " NOT NULL" } else { "" }
                )
            })
            .collect();

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL REFERENCES organizations(id),
                {columns}
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_org ON {table}(organization_id, created_at DESC);",
            table = spec.name,
            columns = columns,
        ))
        .with_context(|| format!("Failed to create table {}", spec.name))?;
    }

    debug!(tables = CATALOG.len() + 5, "Schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_schema_is_idempotent() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();

        Database::open(path).unwrap();
        Database::open(path).unwrap();
    }

    #[tokio::test]
    async fn test_every_catalog_table_exists() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().await;
        for spec in CATALOG {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [spec.name],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "table {} missing", spec.name);
        }
    }

    #[test]
    fn test_page_window() {
        let page = PageRequest { page: 3, limit: 10 };
        assert_eq!(page.offset(), 20);
        assert_eq!(PageRequest::default().offset(), 0);
        assert_eq!(page.total_pages(0), 0);
        assert_eq!(page.total_pages(21), 3);
        assert_eq!(page.total_pages(30), 3);
    }

    #[test]
    fn test_where_clause_numbering() {
        let mut filter = WhereClause::new();
        filter
            .scope("organization_id", &OrgScope::Only("org-a".into()))
            .eq("status", SqlValue::Text("open".into()))
            .cond("due_date >= ?", SqlValue::Text("2024-01-01".into()));
        assert_eq!(
            filter.sql(),
            " WHERE organization_id = ?1 AND status = ?2 AND due_date >= ?3"
        );
        assert_eq!(filter.params().len(), 3);

        let mut nothing = WhereClause::new();
        nothing.scope("organization_id", &OrgScope::Nothing);
        assert_eq!(nothing.sql(), " WHERE 1 = 0");
        assert_eq!(WhereClause::new().sql(), "");
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let a = now_timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_timestamp();
        assert!(a < b);
        assert_eq!(a.len(), b.len());
    }
}
