//! HTTP API: layout write endpoints, auth, and service wiring.

pub mod app;
pub mod context;
pub mod middleware;
