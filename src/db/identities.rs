//! Identity Storage
//! Accounts, password verification and role bindings

use super::audit::{self, AuditEntry};
use super::organizations::{insert_organization, Organization};
use super::{new_id, now_timestamp, paginate, Database, PageRequest, WhereClause};
use crate::auth::gate::OrgScope;
use crate::auth::models::{Identity, IdentityStatus, Role, RoleBinding, RoleSet};
use anyhow::{Context, Result};
use bcrypt::{hash, verify};
use rusqlite::{params, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde_json::json;
use tracing::{info, warn};

const IDENTITY_COLUMNS: &str =
    "id, email, full_name, password_hash, organization_id, status, created_at, updated_at";

fn map_identity(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let status: String = row.get(5)?;
    Ok(Identity {
        id: row.get(0)?,
        email: row.get(1)?,
        full_name: row.get(2)?,
        password_hash: row.get(3)?,
        organization_id: row.get(4)?,
        status: IdentityStatus::parse(&status).unwrap_or(IdentityStatus::Suspended),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Everything needed to create an account.
#[derive(Debug, Clone)]
pub struct NewIdentity<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub full_name: &'a str,
    pub organization_id: Option<&'a str>,
    pub status: IdentityStatus,
}

pub(crate) fn load_identity(conn: &Connection, id: &str) -> Result<Option<Identity>> {
    conn.query_row(
        &format!("SELECT {} FROM identities WHERE id = ?1", IDENTITY_COLUMNS),
        [id],
        map_identity,
    )
    .optional()
    .context("Failed to load identity")
}

pub(crate) fn load_identity_by_email(conn: &Connection, email: &str) -> Result<Option<Identity>> {
    conn.query_row(
        &format!("SELECT {} FROM identities WHERE email = ?1", IDENTITY_COLUMNS),
        [normalize_email(email)],
        map_identity,
    )
    .optional()
    .context("Failed to load identity by email")
}

pub(crate) fn insert_identity(
    conn: &Connection,
    new: &NewIdentity<'_>,
    hash_cost: u32,
    actor_id: Option<&str>,
) -> Result<Identity> {
    let password_hash = hash(new.password, hash_cost).context("Failed to hash password")?;
    let now = now_timestamp();

    let identity = Identity {
        id: new_id(),
        email: normalize_email(new.email),
        full_name: new.full_name.trim().to_string(),
        password_hash,
        organization_id: new.organization_id.map(str::to_string),
        status: new.status,
        created_at: now.clone(),
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO identities (id, email, full_name, password_hash, organization_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            identity.id,
            identity.email,
            identity.full_name,
            identity.password_hash,
            identity.organization_id,
            identity.status.as_str(),
            identity.created_at,
            identity.updated_at,
        ],
    )
    .context("Failed to insert identity")?;

    audit::append(
        conn,
        &AuditEntry {
            organization_id: identity.organization_id.as_deref(),
            actor_id: actor_id.or(Some(identity.id.as_str())),
            action: "create",
            resource: "identities",
            resource_id: &identity.id,
            changes: Some(json!({ "email": identity.email, "status": identity.status })),
        },
    )?;

    info!(identity_id = %identity.id, "Created identity");
    Ok(identity)
}

/// Idempotent: the (identity, role, organization) triple is unique.
pub(crate) fn insert_binding(
    conn: &Connection,
    identity_id: &str,
    role: Role,
    organization_id: Option<&str>,
    actor_id: Option<&str>,
) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO role_bindings (identity_id, role, organization_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![identity_id, role.as_str(), organization_id, now_timestamp()],
        )
        .context("Failed to bind role")?;

    if inserted > 0 {
        audit::append(
            conn,
            &AuditEntry {
                organization_id,
                actor_id,
                action: "bind_role",
                resource: "identities",
                resource_id: identity_id,
                changes: Some(json!({ "role": role })),
            },
        )?;
        info!(identity_id, role = %role, organization_id, "Bound role");
    }
    Ok(inserted > 0)
}

pub(crate) fn set_password_and_status(
    conn: &Connection,
    identity_id: &str,
    password: &str,
    status: IdentityStatus,
    hash_cost: u32,
) -> Result<()> {
    let password_hash = hash(password, hash_cost).context("Failed to hash password")?;
    conn.execute(
        "UPDATE identities SET password_hash = ?2, status = ?3, updated_at = ?4 WHERE id = ?1",
        params![identity_id, password_hash, status.as_str(), now_timestamp()],
    )
    .context("Failed to update identity credentials")?;
    Ok(())
}

pub(crate) fn set_identity_organization(conn: &Connection, identity_id: &str, org: &str) -> Result<()> {
    conn.execute(
        "UPDATE identities SET organization_id = ?2, updated_at = ?3
         WHERE id = ?1 AND organization_id IS NULL",
        params![identity_id, org, now_timestamp()],
    )
    .context("Failed to set identity organization")?;
    Ok(())
}

impl Database {
    pub(crate) fn hash_cost(&self) -> u32 {
        self.hash_cost
    }

    pub async fn create_identity(&self, new: &NewIdentity<'_>, actor_id: Option<&str>) -> Result<Identity> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let identity = insert_identity(&tx, new, self.hash_cost, actor_id)?;
        tx.commit()?;
        Ok(identity)
    }

    /// Onboarding: a new organization plus its first `pmc_admin`.
    pub async fn register_organization(
        &self,
        organization_name: &str,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(Organization, Identity)> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let org = insert_organization(&tx, organization_name, None)?;
        let identity = insert_identity(
            &tx,
            &NewIdentity {
                email,
                password,
                full_name,
                organization_id: Some(&org.id),
                status: IdentityStatus::Active,
            },
            self.hash_cost,
            None,
        )?;
        insert_binding(&tx, &identity.id, Role::PmcAdmin, Some(&org.id), Some(&identity.id))?;

        tx.commit()?;
        Ok((org, identity))
    }

    /// Creates a `super_admin` account when none exists yet.
    pub async fn ensure_super_admin(&self, email: &str, password: &str) -> Result<bool> {
        let mut conn = self.conn().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM role_bindings WHERE role = ?1",
                [Role::SuperAdmin.as_str()],
                |row| row.get(0),
            )
            .context("Failed to check for super admins")?;
        if count > 0 {
            return Ok(false);
        }

        let tx = conn.transaction()?;
        let identity = match load_identity_by_email(&tx, email)? {
            Some(existing) => existing,
            None => insert_identity(
                &tx,
                &NewIdentity {
                    email,
                    password,
                    full_name: "Administrator",
                    organization_id: None,
                    status: IdentityStatus::Active,
                },
                self.hash_cost,
                None,
            )?,
        };
        insert_binding(&tx, &identity.id, Role::SuperAdmin, None, None)?;
        tx.commit()?;

        info!(email = %identity.email, "Bootstrap super admin created");
        Ok(true)
    }

    pub async fn get_identity(&self, id: &str) -> Result<Option<Identity>> {
        let conn = self.conn().await;
        load_identity(&conn, id)
    }

    pub async fn get_identity_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let conn = self.conn().await;
        load_identity_by_email(&conn, email)
    }

    /// Returns the identity only when the password matches.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<Identity>> {
        let identity = match self.get_identity_by_email(email).await? {
            Some(identity) => identity,
            None => return Ok(None),
        };

        let valid = verify(password, &identity.password_hash).unwrap_or_else(|e| {
            warn!(identity_id = %identity.id, error = %e, "Unreadable password hash");
            false
        });

        Ok(valid.then_some(identity))
    }

    /// Every role bound to the identity, whatever organization the binding
    /// names. Always read from the store.
    pub async fn resolve_roles(&self, identity_id: &str) -> Result<RoleSet> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached("SELECT role FROM role_bindings WHERE identity_id = ?1")?;
        let names = stmt
            .query_map([identity_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to resolve roles")?;

        let mut roles = RoleSet::new();
        for name in names {
            match Role::parse(&name) {
                Some(role) => {
                    roles.insert(role);
                }
                None => warn!(identity_id, role = %name, "Ignoring unknown role binding"),
            }
        }
        Ok(roles)
    }

    pub async fn list_bindings(&self, identity_id: &str) -> Result<Vec<RoleBinding>> {
        let conn = self.conn().await;
        let mut stmt = conn.prepare_cached(
            "SELECT identity_id, role, organization_id, created_at FROM role_bindings
             WHERE identity_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([identity_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list role bindings")?;

        Ok(rows
            .into_iter()
            .filter_map(|(identity_id, role, organization_id, created_at)| {
                Some(RoleBinding {
                    identity_id,
                    role: Role::parse(&role)?,
                    organization_id,
                    created_at,
                })
            })
            .collect())
    }

    pub async fn bind_role(
        &self,
        identity_id: &str,
        role: Role,
        organization_id: Option<&str>,
        actor_id: Option<&str>,
    ) -> Result<bool> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;
        let inserted = insert_binding(&tx, identity_id, role, organization_id, actor_id)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Removes bindings of `role`; `organization` narrows to one binding
    /// scope (`Some(None)` means the unscoped binding).
    pub async fn unbind_role(
        &self,
        identity_id: &str,
        role: Role,
        organization: Option<Option<&str>>,
        actor_id: Option<&str>,
    ) -> Result<usize> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let removed = match organization {
            None => tx.execute(
                "DELETE FROM role_bindings WHERE identity_id = ?1 AND role = ?2",
                params![identity_id, role.as_str()],
            ),
            Some(org) => tx.execute(
                "DELETE FROM role_bindings
                 WHERE identity_id = ?1 AND role = ?2 AND IFNULL(organization_id, '') = IFNULL(?3, '')",
                params![identity_id, role.as_str(), org],
            ),
        }
        .context("Failed to unbind role")?;

        if removed > 0 {
            audit::append(
                &tx,
                &AuditEntry {
                    organization_id: organization.flatten(),
                    actor_id,
                    action: "unbind_role",
                    resource: "identities",
                    resource_id: identity_id,
                    changes: Some(json!({ "role": role, "removed": removed })),
                },
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    pub async fn list_identities(
        &self,
        scope: &OrgScope,
        status: Option<IdentityStatus>,
        page: PageRequest,
    ) -> Result<(Vec<Identity>, u64)> {
        let mut clause = WhereClause::new();
        clause.scope("organization_id", scope);
        if let Some(status) = status {
            clause.eq("status", SqlValue::Text(status.as_str().to_string()));
        }

        let conn = self.conn().await;
        paginate(&conn, "identities", IDENTITY_COLUMNS, &clause, page, map_identity)
    }

    /// Profile and status changes. Identities are never deleted; suspending
    /// is the terminal move.
    pub async fn update_identity(
        &self,
        id: &str,
        full_name: Option<&str>,
        status: Option<IdentityStatus>,
        actor_id: Option<&str>,
    ) -> Result<Option<Identity>> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let changed = tx
            .execute(
                "UPDATE identities SET
                    full_name = COALESCE(?2, full_name),
                    status = COALESCE(?3, status),
                    updated_at = ?4
                 WHERE id = ?1",
                params![id, full_name.map(str::trim), status.map(|s| s.as_str()), now_timestamp()],
            )
            .context("Failed to update identity")?;
        if changed == 0 {
            return Ok(None);
        }

        let identity = load_identity(&tx, id)?.context("Identity vanished during update")?;
        audit::append(
            &tx,
            &AuditEntry {
                organization_id: identity.organization_id.as_deref(),
                actor_id,
                action: "update",
                resource: "identities",
                resource_id: id,
                changes: Some(json!({ "full_name": full_name, "status": status })),
            },
        )?;
        tx.commit()?;
        Ok(Some(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (Database, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let db = Database::open(db_path).unwrap().with_hash_cost(4);
        (db, temp_file)
    }

    #[tokio::test]
    async fn test_register_creates_org_admin() {
        let (db, _temp) = create_test_store();
        let (org, identity) = db
            .register_organization("Acme PM", " Admin@Acme.test ", "password123", "Ada Admin")
            .await
            .unwrap();

        assert_eq!(identity.email, "admin@acme.test");
        assert_eq!(identity.organization_id.as_deref(), Some(org.id.as_str()));
        let roles = db.resolve_roles(&identity.id).await.unwrap();
        assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec![Role::PmcAdmin]);
    }

    #[tokio::test]
    async fn test_password_verification() {
        let (db, _temp) = create_test_store();
        db.register_organization("Acme", "a@acme.test", "password123", "A")
            .await
            .unwrap();

        assert!(db
            .verify_credentials("A@ACME.test", "password123")
            .await
            .unwrap()
            .is_some());
        assert!(db
            .verify_credentials("a@acme.test", "wrongpassword")
            .await
            .unwrap()
            .is_none());
        assert!(db
            .verify_credentials("nobody@acme.test", "password123")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_roles_span_organizations_and_bindings_are_unique() {
        let (db, _temp) = create_test_store();
        let (org_a, identity) = db
            .register_organization("A", "a@x.test", "password123", "A")
            .await
            .unwrap();
        let org_b = db.create_organization("B", None).await.unwrap();

        assert!(db.bind_role(&identity.id, Role::Landlord, Some(&org_b.id), None).await.unwrap());
        assert!(db.bind_role(&identity.id, Role::Landlord, Some(&org_a.id), None).await.unwrap());
        // same triple again is a no-op
        assert!(!db.bind_role(&identity.id, Role::Landlord, Some(&org_b.id), None).await.unwrap());
        assert!(db.bind_role(&identity.id, Role::Vendor, None, None).await.unwrap());
        assert!(!db.bind_role(&identity.id, Role::Vendor, None, None).await.unwrap());

        let roles = db.resolve_roles(&identity.id).await.unwrap();
        assert_eq!(
            roles.into_iter().collect::<Vec<_>>(),
            vec![Role::PmcAdmin, Role::Landlord, Role::Vendor]
        );
        assert_eq!(db.list_bindings(&identity.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_role_changes_are_visible_immediately() {
        let (db, _temp) = create_test_store();
        let (org, identity) = db
            .register_organization("A", "a@x.test", "password123", "A")
            .await
            .unwrap();

        let removed = db
            .unbind_role(&identity.id, Role::PmcAdmin, Some(Some(&org.id)), None)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(db.resolve_roles(&identity.id).await.unwrap().is_empty());
        assert!(db.resolve_roles("no-such-identity").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_role_names_are_skipped() {
        let (db, _temp) = create_test_store();
        let (_, identity) = db
            .register_organization("A", "a@x.test", "password123", "A")
            .await
            .unwrap();
        {
            let conn = db.conn().await;
            conn.execute(
                "INSERT INTO role_bindings (identity_id, role, organization_id, created_at)
                 VALUES (?1, 'owner', NULL, 'x')",
                [&identity.id],
            )
            .unwrap();
        }
        let roles = db.resolve_roles(&identity.id).await.unwrap();
        assert_eq!(roles.len(), 1);
    }

    #[tokio::test]
    async fn test_status_transition_instead_of_delete() {
        let (db, _temp) = create_test_store();
        let (_, identity) = db
            .register_organization("A", "a@x.test", "password123", "A")
            .await
            .unwrap();

        let updated = db
            .update_identity(&identity.id, None, Some(IdentityStatus::Suspended), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, IdentityStatus::Suspended);
        assert_eq!(updated.full_name, "A");
        assert!(db.get_identity(&identity.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_super_admin_once() {
        let (db, _temp) = create_test_store();
        assert!(db.ensure_super_admin("root@x.test", "password123").await.unwrap());
        assert!(!db.ensure_super_admin("other@x.test", "password123").await.unwrap());

        let root = db.get_identity_by_email("root@x.test").await.unwrap().unwrap();
        assert!(root.organization_id.is_none());
        assert!(db
            .resolve_roles(&root.id)
            .await
            .unwrap()
            .contains(&Role::SuperAdmin));
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let (db, _temp) = create_test_store();
        db.register_organization("A", "a@x.test", "password123", "A")
            .await
            .unwrap();
        let err = db
            .create_identity(
                &NewIdentity {
                    email: "A@x.test",
                    password: "password123",
                    full_name: "Again",
                    organization_id: None,
                    status: IdentityStatus::Active,
                },
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::ApiError::from(err),
            crate::error::ApiError::Conflict(_)
        ));
    }
}
