//! Authentication Models
//! Identities, roles and the token claim set

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Role catalog. Names are stored and transmitted in snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin, // Bypasses every allow-list and organization check
    PmcAdmin,
    Pm,
    Landlord,
    Tenant,
    Vendor,
}

/// The role that satisfies every authorization check unconditionally.
pub const OVERRIDE_ROLE: Role = Role::SuperAdmin;

pub type RoleSet = BTreeSet<Role>;

impl Role {
    pub const ALL: [Role; 6] = [
        Role::SuperAdmin,
        Role::PmcAdmin,
        Role::Pm,
        Role::Landlord,
        Role::Tenant,
        Role::Vendor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::PmcAdmin => "pmc_admin",
            Role::Pm => "pm",
            Role::Landlord => "landlord",
            Role::Tenant => "tenant",
            Role::Vendor => "vendor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        Role::ALL.into_iter().find(|r| r.as_str() == s)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStatus {
    Active,
    Suspended,
    Invited,
}

impl IdentityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityStatus::Active => "active",
            IdentityStatus::Suspended => "suspended",
            IdentityStatus::Invited => "invited",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(IdentityStatus::Active),
            "suspended" => Some(IdentityStatus::Suspended),
            "invited" => Some(IdentityStatus::Invited),
            _ => None,
        }
    }
}

/// A person who can authenticate. Never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub organization_id: Option<String>,
    pub status: IdentityStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub identity_id: String,
    pub role: Role,
    pub organization_id: Option<String>,
    pub created_at: String,
}

/// JWT claim set. Returned by the validator exactly as decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // identity id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Informational only; authorization always re-reads role bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub organization_name: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64, // seconds until expiration
    pub user: Identity,
    pub roles: Vec<Role>,
}
