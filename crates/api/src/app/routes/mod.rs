use axum::{
    routing::{delete, get, post},
    Router,
};

pub mod layout;
pub mod system;

/// Authenticated routes that any valid token may call.
pub fn router() -> Router {
    Router::new().route("/ui/_health", get(system::health))
}

/// Layout write routes; additionally require the configured role.
pub fn layout_router() -> Router {
    Router::new()
        .route("/ui/layout", post(layout::post_layout))
        .route("/ui/layout/:id", delete(layout::delete_layout))
}
