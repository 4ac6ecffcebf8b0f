//! Firebase Authentication client over the Identity Toolkit REST API.

mod keys;
mod oauth;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, DisplayFromStr};
use tracing::{debug, instrument, warn};

use self::keys::{KeyCache, SECURE_TOKEN_JWKS_URL};
use self::oauth::AccessTokenSource;
use super::{
    Account, AccountMetadata, AccountPage, AccountUpdate, CustomClaims, IdentityProvider,
    VerifiedToken,
};
use crate::error::ProviderError;

pub use self::oauth::ServiceAccountKey;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct FirebaseAuth {
    project_id: String,
    base_url: String,
    http: Client,
    credentials: AccessTokenSource,
    keys: KeyCache,
}

impl FirebaseAuth {
    pub fn new(
        project_id: impl Into<String>,
        key: ServiceAccountKey,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            project_id: project_id.into(),
            base_url: IDENTITY_TOOLKIT_URL.to_string(),
            http,
            credentials: AccessTokenSource::new(key)?,
            keys: KeyCache::new(SECURE_TOKEN_JWKS_URL),
        })
    }

    /// Build from a service account key file. The project id defaults to the
    /// one recorded in the key.
    pub fn from_credentials_file(
        project_id: Option<String>,
        path: &Path,
    ) -> Result<Self, ProviderError> {
        let key = ServiceAccountKey::from_file(path)?;
        let project_id = project_id
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| ProviderError::Service("no firebase project id configured".into()))?;
        Self::new(project_id, key)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/projects/{}/accounts:{}",
            self.base_url, self.project_id, method
        )
    }

    async fn post<B, R>(&self, method: &str, uid: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let bearer = self.credentials.bearer(&self.http).await?;
        let resp = self
            .http
            .post(self.endpoint(method))
            .bearer_auth(bearer)
            .json(body)
            .send()
            .await?;
        read_response(resp, uid).await
    }

    fn verify_signature(
        &self,
        token: &str,
        key: &DecodingKey,
    ) -> Result<IdTokenClaims, ProviderError> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let data = decode::<IdTokenClaims>(token, key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ProviderError::TokenExpired,
            _ => ProviderError::InvalidToken(e.to_string()),
        })?;
        if data.claims.sub.is_empty() || data.claims.sub.len() > 128 {
            return Err(ProviderError::InvalidToken("bad subject claim".into()));
        }
        Ok(data.claims)
    }
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    auth_time: i64,
    exp: i64,
    #[serde(default)]
    is_admin: bool,
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    disabled: bool,
    /// JSON-encoded custom claims.
    #[serde(default)]
    custom_attributes: Option<String>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    created_at: Option<i64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    last_login_at: Option<i64>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    valid_since: Option<i64>,
}

impl TryFrom<UserRecord> for Account {
    type Error = ProviderError;

    fn try_from(record: UserRecord) -> Result<Self, Self::Error> {
        let custom_claims = match record.custom_attributes.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw).map_err(|e| {
                ProviderError::Service(format!("bad custom claims on {}: {}", record.local_id, e))
            })?,
            _ => CustomClaims::default(),
        };
        let creation_timestamp = record
            .created_at
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_default();
        Ok(Account {
            uid: record.local_id,
            email: record.email,
            display_name: record.display_name,
            disabled: record.disabled,
            custom_claims,
            metadata: AccountMetadata {
                creation_timestamp,
                last_sign_in_timestamp: record
                    .last_login_at
                    .and_then(DateTime::<Utc>::from_timestamp_millis),
            },
            tokens_valid_after: record
                .valid_since
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    local_id: [&'a str; 1],
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<UserRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[skip_serializing_none]
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    local_id: &'a str,
    email: Option<&'a str>,
    display_name: Option<&'a str>,
    disable_user: Option<bool>,
    custom_attributes: Option<String>,
    /// Epoch seconds, sent as a decimal string.
    valid_since: Option<String>,
}

impl<'a> UpdateRequest<'a> {
    fn new(local_id: &'a str) -> Self {
        Self {
            local_id,
            email: None,
            display_name: None,
            disable_user: None,
            custom_attributes: None,
            valid_since: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    local_id: &'a str,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

async fn read_response<R: DeserializeOwned>(
    resp: Response,
    uid: &str,
) -> Result<R, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<R>().await?);
    }
    let envelope: ErrorEnvelope = resp.json().await.unwrap_or_default();
    Err(map_error_message(status.as_u16(), &envelope.error.message, uid))
}

/// Identity Toolkit reports failures as `CODE` or `CODE : detail`.
fn map_error_message(status: u16, message: &str, uid: &str) -> ProviderError {
    let code = message.split(':').next().unwrap_or_default().trim();
    match code {
        "USER_NOT_FOUND" => ProviderError::UserNotFound(uid.to_string()),
        "EMAIL_EXISTS" | "DUPLICATE_EMAIL" => ProviderError::EmailAlreadyExists,
        "USER_DISABLED" => ProviderError::UserDisabled,
        "INVALID_PAGE_SELECTION" | "INVALID_EMAIL" | "INVALID_DISPLAY_NAME" => {
            ProviderError::InvalidArgument(message.to_string())
        }
        _ => ProviderError::Service(format!("status {status}: {message}")),
    }
}

#[async_trait]
impl IdentityProvider for FirebaseAuth {
    #[instrument(skip(self, token))]
    async fn verify_id_token(
        &self,
        token: &str,
        check_revoked: bool,
    ) -> Result<VerifiedToken, ProviderError> {
        let header =
            decode_header(token).map_err(|e| ProviderError::InvalidToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(ProviderError::InvalidToken("unexpected signing algorithm".into()));
        }
        let kid = header
            .kid
            .ok_or_else(|| ProviderError::InvalidToken("missing key id".into()))?;
        let key = self.keys.decoding_key(&self.http, &kid).await?;
        let claims = self.verify_signature(token, &key)?;

        let auth_time = DateTime::<Utc>::from_timestamp(claims.auth_time, 0)
            .ok_or_else(|| ProviderError::InvalidToken("bad auth_time".into()))?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| ProviderError::InvalidToken("bad exp".into()))?;

        if check_revoked {
            let account = match self.get_account(&claims.sub).await {
                Ok(account) => account,
                Err(ProviderError::UserNotFound(_)) => {
                    return Err(ProviderError::InvalidToken("account no longer exists".into()))
                }
                Err(e) => return Err(e),
            };
            if account.disabled {
                return Err(ProviderError::UserDisabled);
            }
            if let Some(valid_after) = account.tokens_valid_after {
                if claims.auth_time < valid_after.timestamp() {
                    return Err(ProviderError::TokenRevoked);
                }
            }
        }

        Ok(VerifiedToken {
            uid: claims.sub,
            email: claims.email,
            is_admin: claims.is_admin,
            auth_time,
            expires_at,
        })
    }

    async fn get_account(&self, uid: &str) -> Result<Account, ProviderError> {
        let resp: LookupResponse = self
            .post("lookup", uid, &LookupRequest { local_id: [uid] })
            .await?;
        let record = resp
            .users
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::UserNotFound(uid.to_string()))?;
        record.try_into()
    }

    async fn list_accounts(
        &self,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<AccountPage, ProviderError> {
        let bearer = self.credentials.bearer(&self.http).await?;
        let mut request = self
            .http
            .get(self.endpoint("batchGet"))
            .bearer_auth(bearer)
            .query(&[("maxResults", max_results.to_string())]);
        if let Some(token) = page_token.filter(|t| !t.is_empty()) {
            request = request.query(&[("nextPageToken", token)]);
        }
        let resp: BatchGetResponse = read_response(request.send().await?, "").await?;
        let accounts = resp
            .users
            .into_iter()
            .map(Account::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = accounts.len(), "listed accounts");
        Ok(AccountPage::new(accounts, resp.next_page_token))
    }

    async fn update_account(
        &self,
        uid: &str,
        update: &AccountUpdate,
    ) -> Result<Account, ProviderError> {
        let mut body = UpdateRequest::new(uid);
        body.email = update.email.as_deref();
        body.display_name = update.display_name.as_deref();
        body.disable_user = update.disabled;
        let _: Empty = self.post("update", uid, &body).await?;
        self.get_account(uid).await
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: &CustomClaims,
    ) -> Result<(), ProviderError> {
        let encoded = serde_json::to_string(claims)
            .map_err(|e| ProviderError::Service(format!("encoding claims: {e}")))?;
        let mut body = UpdateRequest::new(uid);
        body.custom_attributes = Some(encoded);
        let _: Empty = self.post("update", uid, &body).await?;
        Ok(())
    }

    async fn delete_account(&self, uid: &str) -> Result<(), ProviderError> {
        let _: Empty = self
            .post("delete", uid, &DeleteRequest { local_id: uid })
            .await?;
        Ok(())
    }

    async fn revoke_refresh_tokens(&self, uid: &str) -> Result<(), ProviderError> {
        let mut body = UpdateRequest::new(uid);
        body.valid_since = Some(Utc::now().timestamp().to_string());
        let _: Empty = self.post("update", uid, &body).await.map_err(|e| {
            warn!(uid = %uid, error = %e, "failed to revoke refresh tokens");
            e
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_toolkit_error_codes() {
        assert!(matches!(
            map_error_message(400, "USER_NOT_FOUND", "u1"),
            ProviderError::UserNotFound(uid) if uid == "u1"
        ));
        assert!(matches!(
            map_error_message(400, "EMAIL_EXISTS", "u1"),
            ProviderError::EmailAlreadyExists
        ));
        assert!(matches!(
            map_error_message(400, "INVALID_PAGE_SELECTION : bad token", ""),
            ProviderError::InvalidArgument(_)
        ));
        assert!(matches!(
            map_error_message(503, "BACKEND_ERROR", "u1"),
            ProviderError::Service(_)
        ));
    }

    #[test]
    fn user_record_converts_timestamps_and_claims() {
        let record: UserRecord = serde_json::from_value(serde_json::json!({
            "localId": "abc",
            "email": "a@example.com",
            "customAttributes": "{\"is_admin\":true,\"tier\":\"gold\"}",
            "createdAt": "1700000000000",
            "lastLoginAt": "1700000500000",
            "validSince": "1700000100"
        }))
        .unwrap();
        let account = Account::try_from(record).unwrap();
        assert!(account.custom_claims.is_admin);
        assert_eq!(account.custom_claims.extra["tier"], "gold");
        assert_eq!(account.metadata.creation_timestamp.timestamp(), 1_700_000_000);
        assert_eq!(account.tokens_valid_after.unwrap().timestamp(), 1_700_000_100);
        assert!(!account.disabled);
    }

    #[test]
    fn update_body_omits_unset_fields() {
        let mut body = UpdateRequest::new("abc");
        body.valid_since = Some("42".into());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"localId": "abc", "validSince": "42"}));
    }
}
