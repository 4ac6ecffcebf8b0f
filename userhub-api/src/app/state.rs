use std::sync::Arc;

use userhub_core::{AccountCoordinator, IdentityProvider, ProfileStore};

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn ProfileStore>,
    /// Sequences writes that touch both the provider and the store.
    pub coordinator: Arc<AccountCoordinator>,
}
