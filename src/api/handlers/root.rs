use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

// Undocumented convenience endpoint; the real surface lives under /v1.
pub async fn root() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
