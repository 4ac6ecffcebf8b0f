//! Request authorization pipeline.
//!
//! `authenticate` checks the credential format and verifies the token;
//! `require_admin` checks the admin claim and is only ever layered inside
//! `authenticate` (see `router::admin_only`). Handlers then pull the context
//! they need through the `Caller` and `CurrentProfile` extractors.

use axum::async_trait;
use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, info, warn};
use userhub_core::{CoreError, Profile, ProfileTx, ProviderError, VerifiedToken};

use super::error::ApiError;
use super::state::AppState;

/// Verified token claims for the current request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: VerifiedToken,
}

/// Extract the token from a single `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Result<String, ApiError> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let Some(value) = values.next() else {
        return Err(ApiError::missing_header());
    };
    if values.next().is_some() {
        return Err(ApiError::invalid_header());
    }

    let value = value.to_str().map_err(|_| ApiError::invalid_header())?;
    if value.trim().is_empty() {
        return Err(ApiError::missing_header());
    }

    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") => Ok(token.to_string()),
        _ => Err(ApiError::invalid_header()),
    }
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let path = request.uri().path().to_string();

    let token = bearer_token(request.headers()).map_err(|e| {
        info!(path = %path, code = e.code(), "authentication failed");
        e
    })?;

    let verified = match state.provider.verify_id_token(&token, true).await {
        Ok(v) => v,
        Err(e) => {
            match &e {
                ProviderError::InvalidToken(reason) => {
                    warn!(path = %path, reason = %reason, "invalid id token received")
                }
                ProviderError::UserDisabled => warn!(path = %path, "disabled account rejected"),
                ProviderError::TokenExpired | ProviderError::TokenRevoked => {
                    info!(path = %path, error = %e, "authentication failed")
                }
                _ => {}
            }
            return Err(e.into());
        }
    };

    debug!(uid = %verified.uid, path = %path, "request authenticated");
    request
        .extensions_mut()
        .insert(AuthContext { token: verified });
    Ok(next.run(request).await)
}

pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let Some(auth) = request.extensions().get::<AuthContext>() else {
        return Err(ApiError::contract_violation("AuthContext"));
    };

    if !auth.token.is_admin {
        warn!(
            uid = %auth.token.uid,
            path = %request.uri().path(),
            "forbidden: non-admin attempted an admin-only resource"
        );
        return Err(ApiError::admin_required());
    }

    Ok(next.run(request).await)
}

/// The verified caller. Rejects with a contract violation when the route was
/// not wrapped by `authenticate`.
#[derive(Debug, Clone)]
pub struct Caller(pub VerifiedToken);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .map(|auth| Caller(auth.token.clone()))
            .ok_or_else(|| ApiError::contract_violation("AuthContext"))
    }
}

/// The caller's profile row, loaded inside the request's store transaction.
/// A verified account without a row is a data-integrity fault.
pub struct CurrentProfile {
    pub caller: VerifiedToken,
    pub profile: Profile,
    pub tx: Box<dyn ProfileTx>,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentProfile {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Caller(caller) = Caller::from_request_parts(parts, state).await?;

        let mut tx = state.store.begin().await.map_err(CoreError::from)?;
        let profile = tx
            .find(&caller.uid)
            .await
            .map_err(CoreError::from)?
            .ok_or_else(|| CoreError::missing_profile(&caller.uid))?;

        Ok(Self {
            caller,
            profile,
            tx,
        })
    }
}
