//! Propdesk Backend Library
//!
//! Multi-tenant property management back office: organization-scoped
//! records behind a role-based gate.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;

pub use api::{create_router, AppState};
pub use config::Config;
pub use db::Database;
pub use error::ApiError;
