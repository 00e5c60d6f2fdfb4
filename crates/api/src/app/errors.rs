use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use citylayout_infra::LayoutServiceError;

pub fn service_error_to_response(err: LayoutServiceError) -> axum::response::Response {
    match err {
        LayoutServiceError::StorageUnavailable(e) => {
            error!(error = %e, "layout storage failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn bad_request(message: impl Into<String>) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({ "message": message.into() })),
    )
        .into_response()
}
