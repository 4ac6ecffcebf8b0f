use std::any::Any;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use super::cors::CorsPolicy;
use super::error::ApiError;
use super::handlers::{
    change_disabled, change_role, create_user_profile, delete_me, delete_user, get_me, get_user,
    handler_404, health, list_users, revoke_refresh_token, update_me,
};
use super::middleware::{authenticate, require_admin};
use super::state::AppState;

/// Routes that need a verified token.
fn authenticated(state: &AppState, routes: Router<AppState>) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(state.clone(), authenticate))
}

/// Routes that need a verified token carrying the admin claim. The admin
/// check is layered inside authentication, so it always runs second.
fn admin_only(state: &AppState, routes: Router<AppState>) -> Router<AppState> {
    routes
        .route_layer(from_fn(require_admin))
        .route_layer(from_fn_with_state(state.clone(), authenticate))
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    tracing::error!(panic = %detail, "request handler panicked");
    ApiError::unexpected().into_response()
}

/// Build the router with routes and middleware wired.
pub fn app_router(state: AppState, cors: &CorsPolicy) -> Router {
    let auth_routes = Router::new()
        .route("/auth/revoke-refresh-token", post(revoke_refresh_token))
        .route("/auth/create-user-profile", post(create_user_profile));

    let user_routes =
        Router::new().route("/users/me", get(get_me).patch(update_me).delete(delete_me));

    let admin_routes = Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/change-disabled", post(change_disabled))
        .route("/admin/users/change-role", post(change_role))
        .route(
            "/admin/users/delete-user",
            post(delete_user).delete(delete_user),
        )
        .route("/admin/users/:id", get(get_user));

    let api = Router::new()
        .merge(authenticated(&state, auth_routes.merge(user_routes)))
        .merge(admin_only(&state, admin_routes));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .fallback(handler_404)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors.layer())
        .with_state(state)
}
