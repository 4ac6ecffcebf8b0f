//! Service account credentials and OAuth2 access tokens for admin calls.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::ProviderError;

const SCOPES: &str =
    "https://www.googleapis.com/auth/cloud-platform https://www.googleapis.com/auth/identitytoolkit";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Subset of a downloaded service account JSON key.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let data = std::fs::read(path).map_err(|e| {
            ProviderError::Service(format!("reading credentials {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            ProviderError::Service(format!("parsing credentials {}: {}", path.display(), e))
        })
    }
}

#[derive(Serialize)]
struct GrantClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

pub(super) struct AccessTokenSource {
    key: ServiceAccountKey,
    signer: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl AccessTokenSource {
    pub(super) fn new(key: ServiceAccountKey) -> Result<Self, ProviderError> {
        let signer = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| ProviderError::Service(format!("invalid service account key: {e}")))?;
        Ok(Self {
            key,
            signer,
            cached: Mutex::new(None),
        })
    }

    /// Current bearer token, exchanging a fresh assertion a minute before expiry.
    pub(super) async fn bearer(&self, http: &Client) -> Result<String, ProviderError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > Utc::now()) {
            return Ok(token.value.clone());
        }

        let now = Utc::now();
        let claims = GrantClaims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.signer)
            .map_err(|e| ProviderError::Service(format!("signing token request: {e}")))?;

        let resp: TokenResponse = http
            .post(&self.key.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(expires_in = resp.expires_in, "obtained access token");

        let value = resp.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: now + Duration::seconds(resp.expires_in - 60),
        });
        Ok(value)
    }
}
