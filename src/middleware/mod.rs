//! Middleware for observability.

pub mod logging;

pub use logging::{request_logging, AuthenticatedIdentity, REQUEST_ID_HEADER};
