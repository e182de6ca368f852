//! Propdesk - property management back office API
//! Mission: Every organization sees its own portfolio, and only its own

use anyhow::{Context, Result};
use propdesk_backend::{
    auth::{JwtHandler, PolicyTable},
    create_router, AppState, Config, Database,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();
    init_tracing();

    info!("Propdesk API starting");

    let db = Database::open(&config.database_path)?;
    info!(path = %config.database_path, "Database initialized");

    if let Some((email, password)) = config.bootstrap_admin() {
        if db.ensure_super_admin(email, password).await? {
            info!(email, "Bootstrap super admin ready");
        }
    }

    let policies = PolicyTable::load(config.policy_path())?;
    info!(routes = policies.len(), "Route policies loaded");

    let state = AppState {
        db,
        jwt: Arc::new(JwtHandler::new(config.jwt_secret(), config.token_ttl_hours)),
        policies: Arc::new(policies),
        invitation_ttl: chrono::Duration::hours(config.invitation_ttl_hours),
    };
    let app = create_router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "API server listening");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Initialize tracing with an env-overridable filter
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "propdesk_backend=debug,propdesk=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
