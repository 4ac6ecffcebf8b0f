//! Identity provider abstraction: accounts, claims, token verification.

mod firebase;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;

pub use firebase::{FirebaseAuth, ServiceAccountKey};
pub use memory::{AccountSeed, MemoryIdentityProvider, SeedFile};

/// Custom claims attached to an account. Only the admin flag is interpreted;
/// every other claim is carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomClaims {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CustomClaims {
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMetadata {
    pub creation_timestamp: DateTime<Utc>,
    pub last_sign_in_timestamp: Option<DateTime<Utc>>,
}

/// Provider-owned account record, always fetched fresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub disabled: bool,
    pub custom_claims: CustomClaims,
    pub metadata: AccountMetadata,
    /// Tokens authenticated before this instant are revoked.
    pub tokens_valid_after: Option<DateTime<Utc>>,
}

/// Claims read from a verified ID token for the duration of one request.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub uid: String,
    pub email: Option<String>,
    pub is_admin: bool,
    pub auth_time: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One page of accounts. `next_page_token` is never an empty string.
#[derive(Debug, Clone)]
pub struct AccountPage {
    pub accounts: Vec<Account>,
    pub next_page_token: Option<String>,
}

impl AccountPage {
    pub(crate) fn new(accounts: Vec<Account>, next_page_token: Option<String>) -> Self {
        Self {
            accounts,
            next_page_token: next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Account fields a caller may change; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub disabled: Option<bool>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.display_name.is_none() && self.disabled.is_none()
    }
}

/// Narrow interface to the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer token. With `check_revoked` the provider is also asked
    /// whether the account is disabled or its tokens were revoked.
    async fn verify_id_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<VerifiedToken, ProviderError>;

    async fn get_account(&self, uid: &str) -> Result<Account, ProviderError>;

    async fn list_accounts(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<AccountPage, ProviderError>;

    async fn update_account(
        &self,
        uid: &str,
        update: &AccountUpdate,
    ) -> Result<Account, ProviderError>;

    /// Replace the account's custom claims.
    async fn set_custom_claims(&self, uid: &str, claims: &CustomClaims)
        -> Result<(), ProviderError>;

    async fn delete_account(&self, uid: &str) -> Result<(), ProviderError>;

    async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), ProviderError>;
}
