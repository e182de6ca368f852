use super::audit::{self, AuditEntry};
use super::{new_id, now_timestamp, paginate, Database, PageRequest, WhereClause};
use crate::auth::gate::OrgScope;
use anyhow::{Context, Result};
use rusqlite::{params, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

pub const ORG_STATUSES: &[&str] = &["active", "suspended", "archived"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

const ORG_COLUMNS: &str = "id, name, slug, status, created_at, updated_at";

fn map_org(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "org".to_string()
    } else {
        slug
    }
}

/// Inserts on an open connection; used by onboarding as well.
pub(crate) fn insert_organization(
    conn: &Connection,
    name: &str,
    actor_id: Option<&str>,
) -> Result<Organization> {
    let id = new_id();
    let mut slug = slugify(name);
    let taken: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM organizations WHERE slug = ?1)",
            [&slug],
            |row| row.get(0),
        )
        .context("Failed to check organization slug")?;
    if taken {
        slug = format!("{}-{}", slug, &id[..8]);
    }

    let now = now_timestamp();
    let org = Organization {
        id,
        name: name.trim().to_string(),
        slug,
        status: "active".to_string(),
        created_at: now.clone(),
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO organizations (id, name, slug, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![org.id, org.name, org.slug, org.status, org.created_at, org.updated_at],
    )
    .context("Failed to insert organization")?;

    audit::append(
        conn,
        &AuditEntry {
            organization_id: Some(&org.id),
            actor_id,
            action: "create",
            resource: "organizations",
            resource_id: &org.id,
            changes: Some(json!({ "name": org.name, "slug": org.slug })),
        },
    )?;

    info!(organization_id = %org.id, slug = %org.slug, "Created organization");
    Ok(org)
}

impl Database {
    pub async fn create_organization(&self, name: &str, actor_id: Option<&str>) -> Result<Organization> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let org = insert_organization(&tx, name, actor_id)?;
        tx.commit()?;
        Ok(org)
    }

    pub async fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let conn = self.conn().await;
        conn.query_row(
            &format!("SELECT {} FROM organizations WHERE id = ?1", ORG_COLUMNS),
            [id],
            map_org,
        )
        .optional()
        .context("Failed to load organization")
    }

    /// The organization's own id is its scope column.
    pub async fn list_organizations(
        &self,
        scope: &OrgScope,
        status: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<Organization>, u64)> {
        let mut clause = WhereClause::new();
        clause.scope("id", scope);
        if let Some(status) = status {
            clause.eq("status", SqlValue::Text(status.to_string()));
        }

        let conn = self.conn().await;
        paginate(&conn, "organizations", ORG_COLUMNS, &clause, page, map_org)
    }

    /// Returns `None` when the organization does not exist.
    pub async fn update_organization(
        &self,
        id: &str,
        name: Option<&str>,
        status: Option<&str>,
        actor_id: Option<&str>,
    ) -> Result<Option<Organization>> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let changed = tx
            .execute(
                "UPDATE organizations SET
                    name = COALESCE(?2, name),
                    status = COALESCE(?3, status),
                    updated_at = ?4
                 WHERE id = ?1",
                params![id, name.map(str::trim), status, now_timestamp()],
            )
            .context("Failed to update organization")?;
        if changed == 0 {
            return Ok(None);
        }

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(id),
                actor_id,
                action: "update",
                resource: "organizations",
                resource_id: id,
                changes: Some(json!({ "name": name, "status": status })),
            },
        )?;

        let org = tx
            .query_row(
                &format!("SELECT {} FROM organizations WHERE id = ?1", ORG_COLUMNS),
                [id],
                map_org,
            )
            .context("Failed to reload organization")?;
        tx.commit()?;
        Ok(Some(org))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Property Co."), "acme-property-co");
        assert_eq!(slugify("  --Zed  & Sons--"), "zed-sons");
        assert_eq!(slugify("!!!"), "org");
    }

    #[tokio::test]
    async fn test_duplicate_names_get_distinct_slugs() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_organization("Acme", None).await.unwrap();
        let b = db.create_organization("Acme", None).await.unwrap();
        assert_eq!(a.slug, "acme");
        assert_ne!(a.slug, b.slug);
        assert!(b.slug.starts_with("acme-"));
    }

    #[tokio::test]
    async fn test_list_scoped_to_own_organization() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_organization("A", None).await.unwrap();
        db.create_organization("B", None).await.unwrap();

        let (all, total) = db
            .list_organizations(&OrgScope::All, None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!((all.len(), total), (2, 2));

        let (own, total) = db
            .list_organizations(&OrgScope::Only(a.id.clone()), None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(own[0], a);
    }

    #[tokio::test]
    async fn test_update_and_missing() {
        let db = Database::open_in_memory().unwrap();
        let org = db.create_organization("Old", None).await.unwrap();

        let updated = db
            .update_organization(&org.id, Some("New"), Some("archived"), Some("actor"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.status, "archived");
        assert_eq!(updated.slug, org.slug);

        assert!(db
            .update_organization("missing", Some("x"), None, None)
            .await
            .unwrap()
            .is_none());
    }
}
