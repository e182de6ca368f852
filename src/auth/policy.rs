//! Route policy table
//!
//! One declarative mapping of route key -> (allow-list, organization
//! requirement), built once at startup. Resource routes are derived from the
//! resource catalog as `<resource>.<action>`; the remaining keys are listed
//! here. A TOML file may override individual entries.

use crate::auth::gate::RoutePolicy;
use crate::auth::models::Role::{self, *};
use crate::models::CATALOG;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

pub const ADMINS: &[Role] = &[PmcAdmin];
pub const STAFF: &[Role] = &[PmcAdmin, Pm];
pub const OWNERS: &[Role] = &[PmcAdmin, Pm, Landlord];
pub const OCCUPANTS: &[Role] = &[PmcAdmin, Pm, Landlord, Tenant];
pub const EVERYONE: &[Role] = &[PmcAdmin, Pm, Landlord, Tenant, Vendor];

const FIXED_ROUTES: &[(&str, &[Role])] = &[
    ("organizations.read", EVERYONE),
    ("organizations.create", &[]),
    ("organizations.update", ADMINS),
    ("organizations.delete", &[]),
    ("users.read", STAFF),
    ("users.update", ADMINS),
    ("roles.assign", ADMINS),
    ("invitations.read", STAFF),
    ("invitations.create", STAFF),
    ("invitations.revoke", STAFF),
    ("audit.read", ADMINS),
    ("reports.read", OWNERS),
];

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    routes: HashMap<String, RoutePolicy>,
}

#[derive(Debug, Clone)]
pub struct PolicyTable {
    routes: HashMap<String, RoutePolicy>,
    fallback: RoutePolicy,
}

impl PolicyTable {
    pub fn defaults() -> Self {
        let mut routes = HashMap::new();

        for (key, allow) in FIXED_ROUTES {
            routes.insert(key.to_string(), RoutePolicy::new(allow));
        }

        for spec in CATALOG {
            for (action, allow) in spec.access.actions() {
                routes.insert(format!("{}.{}", spec.name, action), RoutePolicy::new(allow));
            }
        }

        Self {
            routes,
            fallback: RoutePolicy::override_only(),
        }
    }

    /// Defaults overlaid with the `[routes."<key>"]` tables of `text`.
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(text).context("Invalid policy file")?;
        let mut table = Self::defaults();

        for (key, policy) in file.routes {
            if !table.routes.contains_key(&key) {
                bail!("Unknown route key in policy file: {}", key);
            }
            table.routes.insert(key, policy);
        }

        Ok(table)
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::defaults()),
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read policy file {}", path.display()))?;
                let table = Self::from_toml(&text)?;
                info!(path = %path.display(), routes = table.len(), "Loaded route policy overrides");
                Ok(table)
            }
        }
    }

    /// Unknown keys resolve to an override-only policy.
    pub fn get(&self, key: &str) -> &RoutePolicy {
        self.routes.get(key).unwrap_or_else(|| {
            warn!(route = key, "No policy declared for route; override role only");
            &self.fallback
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
