//! Writes that span the identity provider and the profile store.
//!
//! There is no transaction covering both systems. Each operation mutates one
//! system first; a failure there aborts cleanly. When the second write fails
//! after the first succeeded the divergence is reported on the incident
//! channel and surfaced as [`IntegrityFault::PartialWrite`]. Nothing is retried
//! or compensated automatically.

mod incident;

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{CoreError, IntegrityFault, ProviderError, Result, StoreError};
use crate::identity::{Account, AccountUpdate, IdentityProvider, VerifiedToken};
use crate::profile::{clamp_display_name, Profile, ProfilePatch, ProfileTx};

pub use incident::{Incident, IncidentSink, LogIncidentSink, Operation};

pub struct AccountCoordinator {
    provider: Arc<dyn IdentityProvider>,
    incidents: Arc<dyn IncidentSink>,
}

impl AccountCoordinator {
    pub fn new(provider: Arc<dyn IdentityProvider>, incidents: Arc<dyn IncidentSink>) -> Self {
        Self {
            provider,
            incidents,
        }
    }

    /// Apply `patch` to the caller's profile. The row is written inside `tx`,
    /// account fields go to the provider, and only then is `tx` committed.
    #[instrument(skip_all, fields(uid = %profile.uid))]
    pub async fn update_profile(
        &self,
        mut tx: Box<dyn ProfileTx>,
        mut profile: Profile,
        patch: &ProfilePatch,
    ) -> Result<Profile> {
        if patch.is_empty() {
            abandon(tx).await;
            return Ok(profile);
        }

        patch.apply(&mut profile);

        if let Err(e) = tx.update(&profile).await {
            abandon(tx).await;
            return Err(e.into());
        }

        if !patch.touches_account() {
            tx.commit().await?;
            info!(fields = ?patch.touched_fields(), "profile updated");
            return Ok(profile);
        }

        if let Err(e) = self
            .provider
            .update_account(&profile.uid, &patch.account_update())
            .await
        {
            abandon(tx).await;
            return Err(e.into());
        }

        if let Err(e) = tx.commit().await {
            let fields = patch.touched_fields().into_iter().map(String::from).collect();
            return Err(self.diverged(
                &profile.uid,
                Operation::UpdateProfile,
                "account updated",
                fields,
                e,
            ));
        }

        info!(fields = ?patch.touched_fields(), "profile and account updated");
        Ok(profile)
    }

    /// Remove the profile row and the provider account. Both halves treat
    /// "already gone" as success.
    #[instrument(skip(self, tx))]
    pub async fn delete_account(&self, mut tx: Box<dyn ProfileTx>, uid: &str) -> Result<()> {
        let removed = tx.delete(uid).await?;

        match self.provider.delete_account(uid).await {
            Ok(()) => {}
            Err(ProviderError::UserNotFound(_)) => {
                info!(uid = %uid, "provider account already absent");
            }
            Err(e) => {
                abandon(tx).await;
                return Err(e.into());
            }
        }

        if let Err(e) = tx.commit().await {
            return Err(self.diverged(
                uid,
                Operation::DeleteAccount,
                "account deleted",
                vec!["profile".into()],
                e,
            ));
        }

        info!(uid = %uid, profile_removed = removed, "account deleted");
        Ok(())
    }

    /// Set the admin claim, keeping every other custom claim, and mirror it on
    /// the profile row. The row is written before the claim and committed after.
    #[instrument(skip(self, tx))]
    pub async fn set_admin(
        &self,
        mut tx: Box<dyn ProfileTx>,
        uid: &str,
        is_admin: bool,
    ) -> Result<Profile> {
        let account = self.provider.get_account(uid).await?;
        let Some(mut profile) = tx.find(uid).await? else {
            abandon(tx).await;
            return Err(CoreError::missing_profile(uid));
        };

        profile.is_admin = is_admin;
        if let Err(e) = tx.update(&profile).await {
            abandon(tx).await;
            return Err(e.into());
        }

        let claims = account.custom_claims.with_admin(is_admin);
        if let Err(e) = self.provider.set_custom_claims(uid, &claims).await {
            abandon(tx).await;
            return Err(e.into());
        }

        if let Err(e) = tx.commit().await {
            return Err(self.diverged(
                uid,
                Operation::SetAdmin,
                "custom claims set",
                vec!["is_admin".into()],
                e,
            ));
        }

        info!(uid = %uid, is_admin, "admin claim changed");
        Ok(profile)
    }

    /// Provider-only; nothing local can diverge.
    #[instrument(skip(self))]
    pub async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<Account> {
        let update = AccountUpdate {
            disabled: Some(disabled),
            ..Default::default()
        };
        let account = self.provider.update_account(uid, &update).await?;
        info!(uid = %uid, disabled, "account disabled flag changed");
        Ok(account)
    }

    /// Create the caller's profile row. The display name defaults to the
    /// account's; `email` in the patch is ignored.
    #[instrument(skip_all, fields(uid = %caller.uid))]
    pub async fn register_profile(
        &self,
        mut tx: Box<dyn ProfileTx>,
        caller: &VerifiedToken,
        patch: &ProfilePatch,
    ) -> Result<Profile> {
        if tx.find(&caller.uid).await?.is_some() {
            abandon(tx).await;
            return Err(CoreError::ProfileExists(caller.uid.clone()));
        }

        let account = self.provider.get_account(&caller.uid).await?;
        let display_name = patch
            .display_name
            .as_deref()
            .or(account.display_name.as_deref())
            .map(clamp_display_name)
            .unwrap_or_default();

        let mut profile = Profile::new(&caller.uid, display_name);
        profile.is_admin = account.custom_claims.is_admin;
        patch.apply(&mut profile);

        tx.insert(&profile).await?;
        tx.commit().await?;
        info!("profile registered");
        Ok(profile)
    }

    fn diverged(
        &self,
        uid: &str,
        operation: Operation,
        provider_step: &'static str,
        fields: Vec<String>,
        err: StoreError,
    ) -> CoreError {
        let incident = Incident::new(uid, operation, provider_step, fields, &err);
        self.incidents.report(&incident);
        IntegrityFault::PartialWrite(Box::new(incident)).into()
    }
}

async fn abandon(tx: Box<dyn ProfileTx>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rollback failed; transaction dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AccountSeed, CustomClaims, MemoryIdentityProvider};
    use crate::profile::{Gender, ProfileStore, SqlProfileStore};
    use crate::testing::{FailingCommitStore, RecordingIncidentSink};
    use chrono::NaiveDate;
    use serde_json::json;

    struct Fixture {
        provider: Arc<MemoryIdentityProvider>,
        store: FailingCommitStore<SqlProfileStore>,
        incidents: Arc<RecordingIncidentSink>,
        coordinator: AccountCoordinator,
    }

    async fn fixture() -> Fixture {
        let provider = Arc::new(MemoryIdentityProvider::new());
        provider
            .insert_account(AccountSeed::new("u1").email("u1@example.com").display_name("User One"))
            .await;
        provider
            .insert_account(AccountSeed::new("u2").email("u2@example.com"))
            .await;

        let store = FailingCommitStore::new(SqlProfileStore::in_memory().await.unwrap());
        let mut tx = store.begin().await.unwrap();
        let mut profile = Profile::new("u1", "User One");
        profile.birthday = NaiveDate::from_ymd_opt(1990, 1, 1);
        profile.gender = Some(Gender::Female);
        tx.insert(&profile).await.unwrap();
        tx.commit().await.unwrap();

        let incidents = Arc::new(RecordingIncidentSink::default());
        let coordinator = AccountCoordinator::new(provider.clone(), incidents.clone());
        Fixture {
            provider,
            store,
            incidents,
            coordinator,
        }
    }

    async fn load(store: &impl ProfileStore, uid: &str) -> Option<Profile> {
        store.begin().await.unwrap().find(uid).await.unwrap()
    }

    fn patch(value: serde_json::Value) -> ProfilePatch {
        ProfilePatch::parse(value.as_object().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn provider_rejection_leaves_profile_untouched() {
        let f = fixture().await;
        let mut tx = f.store.begin().await.unwrap();
        let profile = tx.find("u1").await.unwrap().unwrap();

        let err = f
            .coordinator
            .update_profile(
                tx,
                profile.clone(),
                &patch(json!({"email": "u2@example.com", "display_name": "Renamed"})),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::Provider(ProviderError::EmailAlreadyExists)));
        assert_eq!(load(&f.store, "u1").await, Some(profile));
        assert!(f.incidents.incidents().is_empty());
    }

    #[tokio::test]
    async fn display_name_update_reaches_both_systems() {
        let f = fixture().await;
        let mut tx = f.store.begin().await.unwrap();
        let profile = tx.find("u1").await.unwrap().unwrap();

        f.coordinator
            .update_profile(tx, profile, &patch(json!({"display_name": "New Name"})))
            .await
            .unwrap();

        let stored = load(&f.store, "u1").await.unwrap();
        assert_eq!(stored.display_name, "New Name");
        assert_eq!(stored.gender, Some(Gender::Female));
        let account = f.provider.get_account("u1").await.unwrap();
        assert_eq!(account.display_name.as_deref(), Some("New Name"));
    }

    #[tokio::test]
    async fn commit_failure_after_account_update_is_reported() {
        let f = fixture().await;
        let mut tx = f.store.begin().await.unwrap();
        let profile = tx.find("u1").await.unwrap().unwrap();
        f.store.fail_commits(true);

        let err = f
            .coordinator
            .update_profile(tx, profile, &patch(json!({"display_name": "New Name"})))
            .await
            .unwrap_err();
        f.store.fail_commits(false);

        assert!(matches!(
            err,
            CoreError::Integrity(IntegrityFault::PartialWrite(_))
        ));
        let incidents = f.incidents.incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].uid, "u1");
        assert_eq!(incidents[0].operation, Operation::UpdateProfile);
        assert_eq!(incidents[0].fields, ["display_name"]);

        let account = f.provider.get_account("u1").await.unwrap();
        assert_eq!(account.display_name.as_deref(), Some("New Name"));
        assert_eq!(load(&f.store, "u1").await.unwrap().display_name, "User One");
    }

    #[tokio::test]
    async fn overlapping_updates_for_different_users_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("profiles.db").display());
        let store = SqlProfileStore::connect(&url).await.unwrap();

        let provider = Arc::new(MemoryIdentityProvider::new());
        let mut tx = store.begin().await.unwrap();
        for uid in ["a", "b"] {
            provider.insert_account(AccountSeed::new(uid)).await;
            tx.insert(&Profile::new(uid, "Old")).await.unwrap();
        }
        tx.commit().await.unwrap();

        let incidents = Arc::new(RecordingIncidentSink::default());
        let coordinator = Arc::new(AccountCoordinator::new(provider.clone(), incidents.clone()));

        // a holds its transaction open while b starts
        let mut tx_a = store.begin().await.unwrap();
        let profile_a = tx_a.find("a").await.unwrap().unwrap();

        let task_b = tokio::spawn({
            let store = store.clone();
            let coordinator = coordinator.clone();
            async move {
                let mut tx = store.begin().await.unwrap();
                let profile = tx.find("b").await.unwrap().unwrap();
                coordinator
                    .update_profile(tx, profile, &patch(json!({"display_name": "New"})))
                    .await
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        coordinator
            .update_profile(tx_a, profile_a, &patch(json!({"display_name": "New"})))
            .await
            .unwrap();
        task_b.await.unwrap().unwrap();

        assert!(incidents.incidents().is_empty());
        for uid in ["a", "b"] {
            assert_eq!(load(&store, uid).await.unwrap().display_name, "New");
            let account = provider.get_account(uid).await.unwrap();
            assert_eq!(account.display_name.as_deref(), Some("New"));
        }
    }

    #[tokio::test]
    async fn commit_failure_after_claim_change_is_reported() {
        let f = fixture().await;
        f.store.fail_commits(true);

        let tx = f.store.begin().await.unwrap();
        let err = f.coordinator.set_admin(tx, "u1", true).await.unwrap_err();

        assert!(matches!(
            err,
            CoreError::Integrity(IntegrityFault::PartialWrite(_))
        ));
        let incidents = f.incidents.incidents();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].uid, "u1");
        assert_eq!(incidents[0].operation, Operation::SetAdmin);

        // the provider write stands; the local mirror does not
        f.store.fail_commits(false);
        assert!(f.provider.get_account("u1").await.unwrap().custom_claims.is_admin);
        assert!(!load(&f.store, "u1").await.unwrap().is_admin);
    }

    #[tokio::test]
    async fn admin_toggle_keeps_other_claims() {
        let f = fixture().await;
        let mut claims = CustomClaims::default();
        claims.extra.insert("tier".into(), json!("gold"));
        f.provider.set_custom_claims("u1", &claims).await.unwrap();

        let tx = f.store.begin().await.unwrap();
        let profile = f.coordinator.set_admin(tx, "u1", true).await.unwrap();
        assert!(profile.is_admin);

        let account = f.provider.get_account("u1").await.unwrap();
        assert!(account.custom_claims.is_admin);
        assert_eq!(account.custom_claims.extra["tier"], "gold");
    }

    #[tokio::test]
    async fn admin_toggle_without_profile_writes_nothing() {
        let f = fixture().await;
        let tx = f.store.begin().await.unwrap();
        let err = f.coordinator.set_admin(tx, "u2", true).await.unwrap_err();

        assert!(matches!(
            err,
            CoreError::Integrity(IntegrityFault::MissingProfile { .. })
        ));
        assert!(!f.provider.get_account("u2").await.unwrap().custom_claims.is_admin);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_both_sides() {
        let f = fixture().await;

        // u2 never had a profile row
        let tx = f.store.begin().await.unwrap();
        f.coordinator.delete_account(tx, "u2").await.unwrap();
        assert_eq!(f.provider.deletion_count("u2").await, 1);

        // and running it again finds nothing on either side
        let tx = f.store.begin().await.unwrap();
        f.coordinator.delete_account(tx, "u2").await.unwrap();
        assert_eq!(f.provider.deletion_count("u2").await, 1);
    }

    #[tokio::test]
    async fn delete_commit_failure_does_not_restore_account() {
        let f = fixture().await;
        f.store.fail_commits(true);

        let tx = f.store.begin().await.unwrap();
        let err = f.coordinator.delete_account(tx, "u1").await.unwrap_err();

        assert!(matches!(err, CoreError::Integrity(_)));
        assert!(!f.provider.contains("u1").await);
        assert_eq!(f.incidents.incidents()[0].operation, Operation::DeleteAccount);
    }

    #[tokio::test]
    async fn register_uses_account_name_and_rejects_duplicates() {
        let f = fixture().await;
        f.provider
            .insert_account(AccountSeed::new("u3").display_name("x".repeat(60)).admin())
            .await;
        let caller = VerifiedToken {
            uid: "u3".into(),
            email: None,
            is_admin: true,
            auth_time: chrono::Utc::now(),
            expires_at: chrono::Utc::now(),
        };

        let tx = f.store.begin().await.unwrap();
        let profile = f
            .coordinator
            .register_profile(tx, &caller, &patch(json!({"gender": "other"})))
            .await
            .unwrap();
        assert_eq!(profile.display_name.len(), 50);
        assert!(profile.is_admin);
        assert_eq!(profile.gender, Some(Gender::Other));

        let tx = f.store.begin().await.unwrap();
        let err = f
            .coordinator
            .register_profile(tx, &caller, &ProfilePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ProfileExists(uid) if uid == "u3"));
    }
}
