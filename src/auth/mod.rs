//! Authentication Module
//! Mission: Bearer tokens, role resolution and the organization-scoped gate

pub mod api;
pub mod gate;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod policy;

pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, Caller};
pub use policy::PolicyTable;
