//! Invitations
//! Pending role grants that a new user redeems with a one-time token

use super::audit::{self, AuditEntry};
use super::identities::{
    insert_binding, insert_identity, load_identity, load_identity_by_email, normalize_email,
    set_identity_organization, set_password_and_status, NewIdentity,
};
use super::{new_id, now_timestamp, paginate, Database, PageRequest, WhereClause};
use crate::auth::gate::OrgScope;
use crate::auth::models::{Identity, IdentityStatus, Role};
use crate::error::ApiError;
use anyhow::Context;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, types::Value as SqlValue, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub const PENDING: &str = "pending";
pub const ACCEPTED: &str = "accepted";
pub const REVOKED: &str = "revoked";

#[derive(Debug, Clone, Serialize)]
pub struct Invitation {
    pub id: String,
    pub organization_id: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing)]
    pub token: String, // only handed out once, at creation
    pub status: String,
    pub invited_by: String,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expires_at) => expires_at.with_timezone(&Utc) <= now,
            Err(_) => true,
        }
    }
}

const INVITATION_COLUMNS: &str = "id, organization_id, email, role, token, status, invited_by, \
     expires_at, accepted_at, created_at, updated_at";

fn map_invitation(row: &Row<'_>) -> rusqlite::Result<Invitation> {
    let role: String = row.get(3)?;
    Ok(Invitation {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        email: row.get(2)?,
        role: Role::parse(&role).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown role {}", role).into(),
            )
        })?,
        token: row.get(4)?,
        status: row.get(5)?,
        invited_by: row.get(6)?,
        expires_at: row.get(7)?,
        accepted_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn load_invitation(conn: &Connection, column: &str, value: &str) -> rusqlite::Result<Option<Invitation>> {
    conn.query_row(
        &format!("SELECT {} FROM invitations WHERE {} = ?1", INVITATION_COLUMNS, column),
        [value],
        map_invitation,
    )
    .optional()
}

/// What the invitee supplies when redeeming a token.
#[derive(Debug, Clone)]
pub struct Acceptance<'a> {
    pub token: &'a str,
    pub password: &'a str,
    pub full_name: &'a str,
}

impl Database {
    /// One pending invitation per (organization, email).
    pub async fn create_invitation(
        &self,
        organization_id: &str,
        email: &str,
        role: Role,
        invited_by: &str,
        ttl: Duration,
    ) -> Result<Invitation, ApiError> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let email = normalize_email(email);
        let outstanding: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM invitations
             WHERE organization_id = ?1 AND email = ?2 AND status = ?3)",
            params![organization_id, email, PENDING],
            |row| row.get(0),
        )?;
        if outstanding {
            return Err(ApiError::Conflict(format!(
                "A pending invitation for {} already exists",
                email
            )));
        }

        let now = now_timestamp();
        let invitation = Invitation {
            id: new_id(),
            organization_id: organization_id.to_string(),
            email,
            role,
            token: generate_token(),
            status: PENDING.to_string(),
            invited_by: invited_by.to_string(),
            expires_at: (Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Secs, true),
            accepted_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        tx.execute(
            &format!("INSERT INTO invitations ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)", INVITATION_COLUMNS),
            params![
                invitation.id,
                invitation.organization_id,
                invitation.email,
                invitation.role.as_str(),
                invitation.token,
                invitation.status,
                invitation.invited_by,
                invitation.expires_at,
                invitation.accepted_at,
                invitation.created_at,
                invitation.updated_at,
            ],
        )
        .context("Failed to insert invitation")?;

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(organization_id),
                actor_id: Some(invited_by),
                action: "create",
                resource: "invitations",
                resource_id: &invitation.id,
                changes: Some(json!({ "email": invitation.email, "role": role })),
            },
        )?;
        tx.commit()?;

        info!(invitation_id = %invitation.id, organization_id, role = %role, "Created invitation");
        Ok(invitation)
    }

    pub async fn get_invitation(&self, id: &str) -> Result<Option<Invitation>, ApiError> {
        let conn = self.conn().await;
        Ok(load_invitation(&conn, "id", id)?)
    }

    pub async fn list_invitations(
        &self,
        scope: &OrgScope,
        status: Option<&str>,
        page: PageRequest,
    ) -> Result<(Vec<Invitation>, u64), ApiError> {
        let mut clause = WhereClause::new();
        clause.scope("organization_id", scope);
        if let Some(status) = status {
            clause.eq("status", SqlValue::Text(status.to_string()));
        }

        let conn = self.conn().await;
        Ok(paginate(&conn, "invitations", INVITATION_COLUMNS, &clause, page, map_invitation)?)
    }

    /// Only pending invitations can be revoked. `None` when the id is unknown.
    pub async fn revoke_invitation(&self, id: &str, actor_id: Option<&str>) -> Result<Option<Invitation>, ApiError> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let Some(mut invitation) = load_invitation(&tx, "id", id)? else {
            return Ok(None);
        };
        if invitation.status != PENDING {
            return Err(ApiError::invalid_field(
                "status",
                format!("invitation is already {}", invitation.status),
            ));
        }

        invitation.status = REVOKED.to_string();
        invitation.updated_at = now_timestamp();
        tx.execute(
            "UPDATE invitations SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, invitation.status, invitation.updated_at],
        )
        .context("Failed to revoke invitation")?;

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(&invitation.organization_id),
                actor_id,
                action: "revoke",
                resource: "invitations",
                resource_id: id,
                changes: None,
            },
        )?;
        tx.commit()?;
        Ok(Some(invitation))
    }

    /// Redeems a pending, unexpired token: creates the identity (or
    /// activates an `invited` one), binds the role in the invitation's
    /// organization and marks the invitation accepted.
    pub async fn accept_invitation(
        &self,
        acceptance: &Acceptance<'_>,
        now: DateTime<Utc>,
    ) -> Result<(Identity, Invitation), ApiError> {
        let mut conn = self.conn().await;
        let tx = conn.transaction()?;

        let Some(mut invitation) = load_invitation(&tx, "token", acceptance.token)? else {
            return Err(ApiError::NotFound("Invitation not found".to_string()));
        };
        if invitation.status != PENDING {
            return Err(ApiError::invalid_field(
                "token",
                format!("invitation is {}", invitation.status),
            ));
        }
        if invitation.is_expired(now) {
            return Err(ApiError::invalid_field("token", "invitation has expired"));
        }

        let identity = match load_identity_by_email(&tx, &invitation.email)? {
            Some(existing)
                if existing.status == IdentityStatus::Invited
                    && existing
                        .organization_id
                        .as_deref()
                        .map_or(true, |org| org == invitation.organization_id) =>
            {
                set_password_and_status(
                    &tx,
                    &existing.id,
                    acceptance.password,
                    IdentityStatus::Active,
                    self.hash_cost,
                )?;
                existing.id
            }
            Some(existing) if existing.status == IdentityStatus::Invited => {
                return Err(ApiError::Conflict(format!(
                    "The account for {} belongs to another organization",
                    invitation.email
                )))
            }
            Some(_) => {
                return Err(ApiError::Conflict(format!(
                    "An account for {} already exists; sign in instead",
                    invitation.email
                )))
            }
            None => {
                insert_identity(
                    &tx,
                    &NewIdentity {
                        email: &invitation.email,
                        password: acceptance.password,
                        full_name: acceptance.full_name,
                        organization_id: Some(&invitation.organization_id),
                        status: IdentityStatus::Active,
                    },
                    self.hash_cost,
                    None,
                )?
                .id
            }
        };
        set_identity_organization(&tx, &identity, &invitation.organization_id)?;
        insert_binding(
            &tx,
            &identity,
            invitation.role,
            Some(&invitation.organization_id),
            Some(&invitation.invited_by),
        )?;

        let accepted_at = now_timestamp();
        tx.execute(
            "UPDATE invitations SET status = ?2, accepted_at = ?3, updated_at = ?3 WHERE id = ?1",
            params![invitation.id, ACCEPTED, accepted_at],
        )
        .context("Failed to mark invitation accepted")?;
        invitation.status = ACCEPTED.to_string();
        invitation.accepted_at = Some(accepted_at.clone());
        invitation.updated_at = accepted_at;

        audit::append(
            &tx,
            &AuditEntry {
                organization_id: Some(&invitation.organization_id),
                actor_id: Some(&identity),
                action: "accept",
                resource: "invitations",
                resource_id: &invitation.id,
                changes: None,
            },
        )?;

        let identity = load_identity(&tx, &identity)?.context("Identity vanished during acceptance")?;
        tx.commit()?;

        info!(identity_id = %identity.id, invitation_id = %invitation.id, "Invitation accepted");
        Ok((identity, invitation))
    }
}
