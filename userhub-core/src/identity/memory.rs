//! In-process identity provider for local development and tests.
//!
//! Tokens are opaque random strings mapped to a snapshot of the account's
//! claims at issue time, so a claim change only shows up in newly issued
//! tokens, matching how a real provider behaves.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    Account, AccountMetadata, AccountPage, AccountUpdate, CustomClaims, IdentityProvider,
    VerifiedToken,
};
use crate::error::ProviderError;

const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Account definition used to seed the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountSeed {
    pub uid: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub is_admin: bool,
    /// Fixed bearer tokens accepted for this account (local development).
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl AccountSeed {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Default::default()
        }
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// Seed file layout: `{"accounts": [...]}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

#[derive(Debug, Clone)]
struct TokenGrant {
    uid: String,
    email: Option<String>,
    is_admin: bool,
    auth_time: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct State {
    /// Insertion order is the listing order.
    accounts: Vec<Account>,
    tokens: HashMap<String, TokenGrant>,
    deletions: HashMap<String, usize>,
}

impl State {
    fn find(&self, uid: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.uid == uid)
    }

    fn find_mut(&mut self, uid: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.uid == uid)
    }

    fn insert(&mut self, seed: AccountSeed) -> Account {
        let now = Utc::now();
        let account = Account {
            uid: seed.uid.clone(),
            email: seed.email,
            display_name: seed.display_name,
            disabled: seed.disabled,
            custom_claims: CustomClaims::default().with_admin(seed.is_admin),
            metadata: AccountMetadata {
                creation_timestamp: now,
                last_sign_in_timestamp: None,
            },
            tokens_valid_after: None,
        };
        self.accounts.retain(|a| a.uid != account.uid);
        self.accounts.push(account.clone());
        for token in seed.tokens {
            let grant = self.grant(&seed.uid, now, now + Duration::days(365));
            self.tokens.insert(token, grant);
        }
        account
    }

    fn grant(&self, uid: &str, auth_time: DateTime<Utc>, expires_at: DateTime<Utc>) -> TokenGrant {
        let account = self.find(uid);
        TokenGrant {
            uid: uid.to_string(),
            email: account.and_then(|a| a.email.clone()),
            is_admin: account.map(|a| a.custom_claims.is_admin).unwrap_or(false),
            auth_time,
            expires_at,
        }
    }
}

/// Identity provider kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    state: Mutex<State>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedFile) -> Self {
        let mut state = State::default();
        for account in seed.accounts {
            state.insert(account);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Load accounts from a JSON seed file.
    pub fn from_seed_file(path: &Path) -> Result<Self, ProviderError> {
        let data = std::fs::read(path).map_err(|e| {
            ProviderError::Service(format!("reading seed file {}: {}", path.display(), e))
        })?;
        let seed: SeedFile = serde_json::from_slice(&data).map_err(|e| {
            ProviderError::Service(format!("parsing seed file {}: {}", path.display(), e))
        })?;
        info!(accounts = seed.accounts.len(), "loaded memory provider seed");
        Ok(Self::from_seed(seed))
    }

    pub async fn insert_account(&self, seed: AccountSeed) -> Account {
        self.state.lock().await.insert(seed)
    }

    /// Issue a token valid for one hour from now.
    pub async fn issue_token(&self, uid: &str) -> String {
        let now = Utc::now();
        self.issue_token_at(uid, now, now + Duration::seconds(DEFAULT_TOKEN_TTL_SECS))
            .await
    }

    /// Issue a token with explicit authentication and expiry instants.
    pub async fn issue_token_at(
        &self,
        uid: &str,
        auth_time: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let mut state = self.state.lock().await;
        let grant = state.grant(uid, auth_time, expires_at);
        state.tokens.insert(token.clone(), grant);
        token
    }

    /// Number of successful deletions of `uid`.
    pub async fn deletion_count(&self, uid: &str) -> usize {
        self.state
            .lock()
            .await
            .deletions
            .get(uid)
            .copied()
            .unwrap_or(0)
    }

    pub async fn contains(&self, uid: &str) -> bool {
        self.state.lock().await.find(uid).is_some()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn verify_id_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<VerifiedToken, ProviderError> {
        let state = self.state.lock().await;
        let grant = state
            .tokens
            .get(token)
            .ok_or_else(|| ProviderError::InvalidToken("unknown token".into()))?;

        if grant.expires_at <= Utc::now() {
            return Err(ProviderError::TokenExpired);
        }

        if check_revoked {
            let account = state
                .find(&grant.uid)
                .ok_or_else(|| ProviderError::InvalidToken("account no longer exists".into()))?;
            if account.disabled {
                return Err(ProviderError::UserDisabled);
            }
            if let Some(valid_after) = account.tokens_valid_after {
                if grant.auth_time.timestamp() < valid_after.timestamp() {
                    return Err(ProviderError::TokenRevoked);
                }
            }
        }

        Ok(VerifiedToken {
            uid: grant.uid.clone(),
            email: grant.email.clone(),
            is_admin: grant.is_admin,
            auth_time: grant.auth_time,
            expires_at: grant.expires_at,
        })
    }

    async fn get_account(&self, uid: &str) -> Result<Account, ProviderError> {
        self.state
            .lock()
            .await
            .find(uid)
            .cloned()
            .ok_or_else(|| ProviderError::UserNotFound(uid.to_string()))
    }

    async fn list_accounts(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<AccountPage, ProviderError> {
        let start = match page_token.filter(|t| !t.is_empty()) {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| ProviderError::InvalidArgument(format!("bad page token: {token}")))?,
            None => 0,
        };
        let state = self.state.lock().await;
        let total = state.accounts.len();
        let start = start.min(total);
        let end = start.saturating_add(max_results).min(total);
        let accounts = state.accounts[start..end].to_vec();
        let next = (end < total).then(|| end.to_string());
        Ok(AccountPage::new(accounts, next))
    }

    async fn update_account(
        &self,
        uid: &str,
        update: &AccountUpdate,
    ) -> Result<Account, ProviderError> {
        let mut state = self.state.lock().await;
        if let Some(email) = &update.email {
            let taken = state.accounts.iter().any(|a| {
                a.uid != uid
                    && a
                        .email
                        .as_deref()
                        .map(|e| e.eq_ignore_ascii_case(email))
                        .unwrap_or(false)
            });
            if taken {
                return Err(ProviderError::EmailAlreadyExists);
            }
        }

        let account = state
            .find_mut(uid)
            .ok_or_else(|| ProviderError::UserNotFound(uid.to_string()))?;
        if let Some(email) = &update.email {
            account.email = Some(email.clone());
        }
        if let Some(name) = &update.display_name {
            account.display_name = Some(name.clone());
        }
        if let Some(disabled) = update.disabled {
            account.disabled = disabled;
        }
        debug!(uid = %uid, "memory provider updated account");
        Ok(account.clone())
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: &CustomClaims,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let account = state
            .find_mut(uid)
            .ok_or_else(|| ProviderError::UserNotFound(uid.to_string()))?;
        account.custom_claims = claims.clone();
        Ok(())
    }

    async fn delete_account(&self, uid: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let before = state.accounts.len();
        state.accounts.retain(|a| a.uid != uid);
        if state.accounts.len() == before {
            return Err(ProviderError::UserNotFound(uid.to_string()));
        }
        *state.deletions.entry(uid.to_string()).or_default() += 1;
        Ok(())
    }

    async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let account = state
            .find_mut(uid)
            .ok_or_else(|| ProviderError::UserNotFound(uid.to_string()))?;
        let now = Utc::now();
        account.tokens_valid_after = Some(now.with_nanosecond(0).unwrap_or(now));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn provider_with(count: usize) -> MemoryIdentityProvider {
        let provider = MemoryIdentityProvider::new();
        for i in 0..count {
            provider
                .insert_account(AccountSeed::new(format!("uid-{i}")).email(format!("u{i}@example.com")))
                .await;
        }
        provider
    }

    #[tokio::test]
    async fn pages_by_offset_and_ends_with_none() {
        let provider = provider_with(25).await;

        let first = provider.list_accounts(10, None).await.unwrap();
        assert_eq!(first.accounts.len(), 10);
        assert_eq!(first.accounts[0].uid, "uid-0");
        assert_eq!(first.next_page_token.as_deref(), Some("10"));

        let second = provider.list_accounts(10, Some("10")).await.unwrap();
        assert_eq!(second.accounts[0].uid, "uid-10");
        assert_eq!(second.next_page_token.as_deref(), Some("20"));

        let last = provider.list_accounts(10, Some("20")).await.unwrap();
        assert_eq!(last.accounts.len(), 5);
        assert_eq!(last.next_page_token, None);
    }

    #[tokio::test]
    async fn rejects_garbage_page_token() {
        let provider = provider_with(3).await;
        let err = provider.list_accounts(10, Some("abc")).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn token_snapshot_keeps_admin_claim_until_reissued() {
        let provider = provider_with(1).await;
        let token = provider.issue_token("uid-0").await;
        provider
            .set_custom_claims("uid-0", &CustomClaims::default().with_admin(true))
            .await
            .unwrap();

        let old = provider.verify_id_token(&token, true).await.unwrap();
        assert!(!old.is_admin);

        let fresh = provider.issue_token("uid-0").await;
        assert!(provider.verify_id_token(&fresh, true).await.unwrap().is_admin);
    }

    #[tokio::test]
    async fn verification_failure_modes() {
        let provider = provider_with(1).await;
        let now = Utc::now();

        let expired = provider
            .issue_token_at("uid-0", now - Duration::hours(2), now - Duration::hours(1))
            .await;
        assert!(matches!(
            provider.verify_id_token(&expired, true).await,
            Err(ProviderError::TokenExpired)
        ));

        assert!(matches!(
            provider.verify_id_token("nope", true).await,
            Err(ProviderError::InvalidToken(_))
        ));

        let stale = provider
            .issue_token_at("uid-0", now - Duration::minutes(10), now + Duration::hours(1))
            .await;
        provider.revoke_refresh_tokens("uid-0").await.unwrap();
        assert!(matches!(
            provider.verify_id_token(&stale, true).await,
            Err(ProviderError::TokenRevoked)
        ));
        // revocation is only consulted when asked for
        assert!(provider.verify_id_token(&stale, false).await.is_ok());

        provider
            .update_account(
                "uid-0",
                &AccountUpdate {
                    disabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let token = provider.issue_token("uid-0").await;
        assert!(matches!(
            provider.verify_id_token(&token, true).await,
            Err(ProviderError::UserDisabled)
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let provider = provider_with(2).await;
        let err = provider
            .update_account(
                "uid-1",
                &AccountUpdate {
                    email: Some("U0@example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmailAlreadyExists));
    }

    #[tokio::test]
    async fn delete_counts_only_successful_removals() {
        let provider = provider_with(1).await;
        provider.delete_account("uid-0").await.unwrap();
        assert!(matches!(
            provider.delete_account("uid-0").await,
            Err(ProviderError::UserNotFound(_))
        ));
        assert_eq!(provider.deletion_count("uid-0").await, 1);
    }

    #[tokio::test]
    async fn seed_file_registers_fixed_tokens() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"accounts":[{{"uid":"dev-admin","email":"dev@example.com","is_admin":true,"tokens":["dev-admin-token"]}}]}}"#
        )
        .unwrap();

        let provider = MemoryIdentityProvider::from_seed_file(file.path()).unwrap();
        let verified = provider
            .verify_id_token("dev-admin-token", true)
            .await
            .unwrap();
        assert_eq!(verified.uid, "dev-admin");
        assert!(verified.is_admin);
    }
}
