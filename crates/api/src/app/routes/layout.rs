use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use citylayout_core::{LayoutId, Payload};

use crate::app::dto::LayoutDocument;
use crate::app::errors::{bad_request, service_error_to_response};
use crate::app::services::AppServices;
use crate::context::AccountContext;

/// `POST /ui/layout`: store a new version of a layout for the caller.
pub async fn post_layout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(account): Extension<AccountContext>,
    body: Result<Json<LayoutDocument>, JsonRejection>,
) -> Response {
    let Json(mut doc) = match body {
        Ok(doc) => doc,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let entity = LayoutId::from_uuid(doc.ensure_id());
    let payload = match serde_json::to_vec(&doc) {
        Ok(bytes) => Payload::new(bytes),
        Err(e) => return bad_request(e.to_string()),
    };

    match services.upsert(account.owner(), entity, payload).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => service_error_to_response(e),
    }
}

/// `DELETE /ui/layout/{id}`: erase every version of one of the caller's layouts.
pub async fn delete_layout(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(account): Extension<AccountContext>,
    Path(id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match services.remove(account.owner(), LayoutId::from_uuid(id)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => service_error_to_response(e),
    }
}
