//! Cached public keys for ID token signature checks.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use reqwest::header::CACHE_CONTROL;
use reqwest::Client;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::ProviderError;

pub(super) const SECURE_TOKEN_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const FALLBACK_MAX_AGE: Duration = Duration::from_secs(3600);

struct CachedKeys {
    set: JwkSet,
    expires_at: Instant,
}

pub(super) struct KeyCache {
    url: String,
    cached: RwLock<Option<CachedKeys>>,
}

impl KeyCache {
    pub(super) fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cached: RwLock::new(None),
        }
    }

    /// Decoding key for `kid`, refreshing the set when it has expired.
    pub(super) async fn decoding_key(
        &self,
        http: &Client,
        kid: &str,
    ) -> Result<DecodingKey, ProviderError> {
        {
            let cached = self.cached.read().await;
            if let Some(keys) = cached.as_ref().filter(|k| k.expires_at > Instant::now()) {
                return lookup(&keys.set, kid);
            }
        }

        let mut cached = self.cached.write().await;
        // another request may have refreshed while we waited for the lock
        if let Some(keys) = cached.as_ref().filter(|k| k.expires_at > Instant::now()) {
            return lookup(&keys.set, kid);
        }

        let resp = http.get(&self.url).send().await?.error_for_status()?;
        let max_age = resp
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age)
            .unwrap_or(FALLBACK_MAX_AGE);
        let set: JwkSet = resp.json().await?;
        debug!(keys = set.keys.len(), max_age_secs = max_age.as_secs(), "refreshed signing keys");

        let key = lookup(&set, kid);
        *cached = Some(CachedKeys {
            set,
            expires_at: Instant::now() + max_age,
        });
        key
    }
}

fn lookup(set: &JwkSet, kid: &str) -> Result<DecodingKey, ProviderError> {
    let jwk = set
        .find(kid)
        .ok_or_else(|| ProviderError::InvalidToken(format!("unknown signing key {kid}")))?;
    DecodingKey::from_jwk(jwk).map_err(|e| ProviderError::Service(format!("bad signing key: {e}")))
}

fn parse_max_age(header: &str) -> Option<Duration> {
    header
        .split(',')
        .filter_map(|part| part.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.parse::<u64>().ok())
        .map(Duration::from_secs)
}
