//! Process configuration
//! Command-line flags with environment fallbacks; `.env` is loaded first.

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

#[derive(Parser, Debug, Clone)]
#[command(name = "propdesk")]
#[command(about = "Multi-tenant property management back office API")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: String,

    /// Path to the SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "propdesk.db")]
    pub database_path: String,

    /// HS256 signing secret for bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    #[arg(long, env = "TOKEN_TTL_HOURS", default_value_t = 24)]
    pub token_ttl_hours: i64,

    /// TOML file overriding route allow-lists
    #[arg(long, env = "POLICY_FILE")]
    pub policy_file: Option<PathBuf>,

    #[arg(long, env = "INVITATION_TTL_HOURS", default_value_t = 168)]
    pub invitation_ttl_hours: i64,

    /// Creates a super_admin with these credentials when none exists
    #[arg(long, env = "BOOTSTRAP_ADMIN_EMAIL")]
    pub bootstrap_admin_email: Option<String>,

    #[arg(long, env = "BOOTSTRAP_ADMIN_PASSWORD", hide_env_values = true)]
    pub bootstrap_admin_password: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        load_env();
        Self::parse()
    }

    pub fn jwt_secret(&self) -> String {
        match &self.jwt_secret {
            Some(secret) if !secret.trim().is_empty() => secret.clone(),
            _ => {
                warn!("JWT_SECRET not set; using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        }
    }

    pub fn policy_path(&self) -> Option<&Path> {
        self.policy_file.as_deref()
    }

    pub fn bootstrap_admin(&self) -> Option<(&str, &str)> {
        match (&self.bootstrap_admin_email, &self.bootstrap_admin_password) {
            (Some(email), Some(password)) => Some((email.as_str(), password.as_str())),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Bootstrap admin needs both BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD");
                None
            }
            (None, None) => None,
        }
    }
}

fn load_env() {
    // cwd and parents
    let _ = dotenv::dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
