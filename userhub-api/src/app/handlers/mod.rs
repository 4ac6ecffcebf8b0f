mod admin;
mod auth;
mod health;
mod users;

pub use admin::{change_disabled, change_role, delete_user, get_user, list_users};
pub use auth::{create_user_profile, revoke_refresh_token};
pub use health::{handler_404, health};
pub use users::{delete_me, get_me, update_me};
