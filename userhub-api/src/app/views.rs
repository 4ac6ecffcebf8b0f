//! Response bodies.

use chrono::NaiveDate;
use serde::Serialize;
use userhub_core::{Account, AccountMetadata, AccountPage, Gender, Profile};

#[derive(Debug, Serialize)]
pub struct AccountView {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub user_metadata: AccountMetadata,
}

impl From<Account> for AccountView {
    fn from(account: Account) -> Self {
        Self {
            uid: account.uid,
            email: account.email,
            display_name: account.display_name,
            user_metadata: account.metadata,
        }
    }
}

/// GET /users/me: fresh account fields plus the caller's profile.
#[derive(Debug, Serialize)]
pub struct MeView {
    #[serde(flatten)]
    pub account: AccountView,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub is_admin: bool,
}

impl MeView {
    pub fn new(account: Account, profile: Profile) -> Self {
        Self {
            account: account.into(),
            birthday: profile.birthday,
            gender: profile.gender,
            is_admin: profile.is_admin,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimsView {
    pub is_admin: bool,
}

#[derive(Debug, Serialize)]
pub struct AdminAccountView {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub disabled: bool,
    pub custom_claims: ClaimsView,
    pub user_metadata: AccountMetadata,
}

impl From<Account> for AdminAccountView {
    fn from(account: Account) -> Self {
        Self {
            uid: account.uid,
            email: account.email,
            display_name: account.display_name,
            disabled: account.disabled,
            custom_claims: ClaimsView {
                is_admin: account.custom_claims.is_admin,
            },
            user_metadata: account.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminUserDetail {
    #[serde(flatten)]
    pub account: AdminAccountView,
    pub profile_name: String,
    pub birthday: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub is_admin: bool,
}

impl AdminUserDetail {
    pub fn new(account: Account, profile: Profile) -> Self {
        Self {
            account: account.into(),
            profile_name: profile.display_name,
            birthday: profile.birthday,
            gender: profile.gender,
            is_admin: profile.is_admin,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountListView {
    pub users: Vec<AdminAccountView>,
    /// `null` on the last page.
    pub next_page_token: Option<String>,
}

impl From<AccountPage> for AccountListView {
    fn from(page: AccountPage) -> Self {
        Self {
            users: page.accounts.into_iter().map(Into::into).collect(),
            next_page_token: page.next_page_token,
        }
    }
}
