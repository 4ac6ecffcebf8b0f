//! User management handlers (admin only; gated by the router).

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use userhub_core::CoreError;

use super::super::error::ApiError;
use super::super::middleware::Caller;
use super::super::params::{PathParam, QueryParams};
use super::super::payload::{both, Payload};
use super::super::state::AppState;
use super::super::views::{AccountListView, AdminUserDetail};

const PAGE_SIZE: usize = 10;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// GET /admin/users - one page of accounts
pub async fn list_users(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ListQuery>,
) -> Result<Json<AccountListView>, ApiError> {
    let token = query.next_page_token.as_deref().filter(|t| !t.is_empty());
    let page = state.provider.list_accounts(PAGE_SIZE, token).await?;
    Ok(Json(page.into()))
}

/// GET /admin/users/:id - account merged with its profile
pub async fn get_user(
    State(state): State<AppState>,
    PathParam(uid): PathParam<String>,
) -> Result<Json<AdminUserDetail>, ApiError> {
    let account = state.provider.get_account(&uid).await?;

    let mut tx = state.store.begin().await.map_err(CoreError::from)?;
    let profile = tx
        .find(&uid)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| CoreError::missing_profile(&uid))?;

    Ok(Json(AdminUserDetail::new(account, profile)))
}

#[derive(Debug, Serialize)]
pub struct DisabledChanged {
    pub uid: String,
    pub disabled: bool,
}

/// POST /admin/users/change-disabled - body `{uid, disabled}`
pub async fn change_disabled(
    State(state): State<AppState>,
    Caller(admin): Caller,
    payload: Payload,
) -> Result<Json<DisabledChanged>, ApiError> {
    let (uid, disabled) = both(payload.string("uid"), payload.boolean("disabled"))?;

    let account = state.coordinator.set_disabled(&uid, disabled).await?;
    info!(admin = %admin.uid, uid = %uid, disabled, "admin changed disabled flag");
    Ok(Json(DisabledChanged {
        uid: account.uid,
        disabled: account.disabled,
    }))
}

#[derive(Debug, Serialize)]
pub struct RoleChanged {
    pub uid: String,
    pub is_admin: bool,
}

/// POST /admin/users/change-role - body `{uid, is_admin}`
pub async fn change_role(
    State(state): State<AppState>,
    Caller(admin): Caller,
    payload: Payload,
) -> Result<Json<RoleChanged>, ApiError> {
    let (uid, is_admin) = both(payload.string("uid"), payload.boolean("is_admin"))?;

    let tx = state.store.begin().await.map_err(CoreError::from)?;
    let profile = state.coordinator.set_admin(tx, &uid, is_admin).await?;
    info!(admin = %admin.uid, uid = %uid, is_admin, "admin changed role");
    Ok(Json(RoleChanged {
        uid: profile.uid,
        is_admin: profile.is_admin,
    }))
}

/// POST|DELETE /admin/users/delete-user - body `{uid}`
pub async fn delete_user(
    State(state): State<AppState>,
    Caller(admin): Caller,
    payload: Payload,
) -> Result<StatusCode, ApiError> {
    let uid = payload
        .string("uid")
        .map_err(|issue| ApiError::validation(vec![issue]))?;

    let tx = state.store.begin().await.map_err(CoreError::from)?;
    state.coordinator.delete_account(tx, &uid).await?;
    info!(admin = %admin.uid, uid = %uid, "admin deleted account");
    Ok(StatusCode::NO_CONTENT)
}
