//! Self-service handlers for the authenticated caller.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use userhub_core::{CoreError, ProfilePatch};

use super::super::error::ApiError;
use super::super::middleware::CurrentProfile;
use super::super::payload::Payload;
use super::super::state::AppState;
use super::super::views::MeView;

/// GET /users/me - account fields merged with the caller's profile
pub async fn get_me(
    State(state): State<AppState>,
    current: CurrentProfile,
) -> Result<Json<MeView>, ApiError> {
    let CurrentProfile {
        caller,
        profile,
        tx,
    } = current;
    // read-only; release the transaction before calling out
    drop(tx);
    let account = state.provider.get_account(&caller.uid).await?;
    Ok(Json(MeView::new(account, profile)))
}

/// PATCH /users/me - partial update of profile and account fields
pub async fn update_me(
    State(state): State<AppState>,
    current: CurrentProfile,
    Payload(body): Payload,
) -> Result<StatusCode, ApiError> {
    let patch = ProfilePatch::parse(&body).map_err(CoreError::from)?;
    state
        .coordinator
        .update_profile(current.tx, current.profile, &patch)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /users/me - remove the caller's profile and account
pub async fn delete_me(
    State(state): State<AppState>,
    current: CurrentProfile,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .delete_account(current.tx, &current.caller.uid)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
