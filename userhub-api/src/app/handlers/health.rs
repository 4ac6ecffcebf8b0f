use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Uri;
use axum::Json;
use serde_json::json;

use super::super::error::ApiError;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Fallback for unmatched routes.
pub async fn handler_404(uri: Uri, connect_info: Option<ConnectInfo<SocketAddr>>) -> ApiError {
    let ip = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());
    tracing::warn!(path = %uri.path(), ip = %ip, "no route matched");
    ApiError::not_found()
}
