//! Token lifecycle and registration handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;
use userhub_core::{CoreError, Profile, ProfilePatch};

use super::super::error::ApiError;
use super::super::middleware::Caller;
use super::super::payload::Payload;
use super::super::state::AppState;

/// POST /auth/revoke-refresh-token - sign the caller out everywhere
pub async fn revoke_refresh_token(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Value>, ApiError> {
    state.provider.revoke_refresh_tokens(&caller.uid).await?;
    info!(uid = %caller.uid, "refresh tokens revoked");
    Ok(Json(json!({
        "message": format!("Successfully revoked refresh tokens for user: {}", caller.uid)
    })))
}

/// POST /auth/create-user-profile - create the caller's profile row
pub async fn create_user_profile(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Payload(body): Payload,
) -> Result<(StatusCode, Json<Profile>), ApiError> {
    let patch = ProfilePatch::parse(&body).map_err(CoreError::from)?;
    let tx = state.store.begin().await.map_err(CoreError::from)?;
    let profile = state
        .coordinator
        .register_profile(tx, &caller, &patch)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}
