//! Scope Gate
//!
//! Pure decision over already-resolved state: the caller's role set, the
//! endpoint policy, the caller's organization and optionally the
//! organization of the record being touched. Nothing here reads the store.
//!
//! Rules, first match wins:
//! 1. the override role allows unconditionally, including across organizations
//! 2. no role in the allow-list denies
//! 3. an organization-required endpoint denies callers without an organization
//! 4. a record from another organization denies
//! 5. otherwise allow

use crate::auth::models::{Role, RoleSet, OVERRIDE_ROLE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allow-list and organization requirement for one route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    pub allow: Vec<Role>,
    #[serde(default = "default_organization_required")]
    pub organization_required: bool,
}

fn default_organization_required() -> bool {
    true
}

impl RoutePolicy {
    pub fn new(allow: &[Role]) -> Self {
        Self {
            allow: allow.to_vec(),
            organization_required: true,
        }
    }

    /// Empty allow-list: only the override role gets through.
    pub fn override_only() -> Self {
        Self::new(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("Insufficient permissions")]
    RoleNotAllowed,
    #[error("Caller is not a member of any organization")]
    NoOrganization,
    #[error("Resource belongs to another organization")]
    OrganizationMismatch,
}

pub fn is_override(roles: &RoleSet) -> bool {
    roles.contains(&OVERRIDE_ROLE)
}

pub fn authorize(
    roles: &RoleSet,
    policy: &RoutePolicy,
    caller_org: Option<&str>,
    resource_org: Option<&str>,
) -> Result<(), Denial> {
    if is_override(roles) {
        return Ok(());
    }

    if !policy.allow.iter().any(|r| roles.contains(r)) {
        return Err(Denial::RoleNotAllowed);
    }

    if policy.organization_required && caller_org.is_none() {
        return Err(Denial::NoOrganization);
    }

    if let Some(resource_org) = resource_org {
        if caller_org != Some(resource_org) {
            return Err(Denial::OrganizationMismatch);
        }
    }

    Ok(())
}

/// Effective organization filter for list queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgScope {
    /// Every organization (override caller, no filter given).
    All,
    Only(String),
    /// Non-override caller without an organization sees nothing.
    Nothing,
}

impl OrgScope {
    pub fn organization_id(&self) -> Option<&str> {
        match self {
            OrgScope::Only(org) => Some(org),
            _ => None,
        }
    }
}

/// Override callers get their requested filter verbatim; everyone else is
/// pinned to their own organization whatever they asked for.
pub fn list_scope(roles: &RoleSet, caller_org: Option<&str>, requested: Option<&str>) -> OrgScope {
    if is_override(roles) {
        return match requested {
            Some(org) => OrgScope::Only(org.to_string()),
            None => OrgScope::All,
        };
    }

    match caller_org {
        Some(org) => OrgScope::Only(org.to_string()),
        None => OrgScope::Nothing,
    }
}
