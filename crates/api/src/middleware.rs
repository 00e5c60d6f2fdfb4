use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::debug;

use citylayout_auth::{JwtValidator, Role};

use crate::context::AccountContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Resolve the bearer token to an [`AccountContext`]; 401 otherwise.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = extract_bearer(req.headers())?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        debug!(error = %e, "rejecting bearer token");
        StatusCode::UNAUTHORIZED
    })?;

    req.extensions_mut()
        .insert(AccountContext::new(claims.sub, claims.roles));

    Ok(next.run(req).await)
}

/// Role required by a group of routes.
#[derive(Debug, Clone)]
pub struct RoleState {
    pub required: Role,
}

/// 403 unless the authenticated account holds the required role.
///
/// Must be layered inside [`auth_middleware`]; a request without an account
/// context is treated as unauthenticated.
pub async fn require_role(
    State(state): State<RoleState>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let account = req
        .extensions()
        .get::<AccountContext>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !account.has_role(&state.required) {
        debug!(owner = %account.owner(), required = %state.required, "missing required role");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
