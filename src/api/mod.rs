//! HTTP API - submission, polling fallback, and operator endpoints

pub mod handlers;
pub mod outcomes;
pub mod routes;

pub use routes::create_router;
