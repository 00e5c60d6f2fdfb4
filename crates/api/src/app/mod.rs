//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: infrastructure wiring (store, broadcaster, RPC transport)
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request DTOs
//! - `errors.rs`: error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use citylayout_auth::{Hs256JwtValidator, Role};

use crate::middleware::{self, AuthState, RoleState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, ServicesError, build_services};

/// Token settings for the protected routes.
#[derive(Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    /// Role required on layout writes and deletes.
    pub required_role: Role,
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>, auth: AuthSettings) -> Router {
    let auth_state = AuthState {
        jwt: Arc::new(Hs256JwtValidator::new(auth.jwt_secret.into_bytes())),
    };
    let role_state = RoleState {
        required: auth.required_role,
    };

    // Role check runs after (inside) the token check.
    let protected = routes::router()
        .merge(routes::layout_router().layer(axum::middleware::from_fn_with_state(
            role_state,
            middleware::require_role,
        )))
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
