//! Application-owned profile records and the transactional store interface.

mod patch;
mod store;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub(crate) use patch::clamp_display_name;
pub use patch::{age_on, ProfilePatch, MINIMUM_AGE};
pub use store::SqlProfileStore;

pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

impl Gender {
    pub const ALL: [Gender; 4] = [
        Gender::Male,
        Gender::Female,
        Gender::Other,
        Gender::PreferNotToSay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::PreferNotToSay => "prefer_not_to_say",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Gender::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| format!("unknown gender '{s}'"))
    }
}

/// One row of `user_profile`, keyed by the provider's account id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub uid: String,
    pub display_name: String,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<Gender>,
    /// Mirror of the account's admin claim.
    pub is_admin: bool,
}

impl Profile {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            birthday: None,
            gender: None,
            is_admin: false,
        }
    }
}

/// Source of per-request transactions.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Start a transaction that may write. Rows read through it stay writable
    /// until it ends, whatever other transactions commit meanwhile.
    async fn begin(&self) -> Result<Box<dyn ProfileTx>, StoreError>;
}

/// A unit of work against the profile table. Dropping it without calling
/// [`ProfileTx::commit`] rolls back.
#[async_trait]
pub trait ProfileTx: Send {
    async fn find(&mut self, uid: &str) -> Result<Option<Profile>, StoreError>;

    async fn insert(&mut self, profile: &Profile) -> Result<(), StoreError>;

    async fn update(&mut self, profile: &Profile) -> Result<(), StoreError>;

    /// Returns whether a row was removed. Absence is not an error.
    async fn delete(&mut self, uid: &str) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gender_parses_wire_names_only() {
        assert_eq!("prefer_not_to_say".parse::<Gender>(), Ok(Gender::PreferNotToSay));
        assert!("Male".parse::<Gender>().is_err());
        assert_eq!(
            serde_json::to_value(Gender::PreferNotToSay).unwrap(),
            "prefer_not_to_say"
        );
    }
}
