//! Cross-origin policy, configured through `UH_CORS_ORIGINS`.

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Which browser origins may call the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    /// Any origin, without credentials. Meant for local development.
    AnyOrigin,
    /// Only the listed origins, with credentials.
    Origins(Vec<HeaderValue>),
}

impl CorsPolicy {
    /// Parse a comma-separated origin list. Unset, blank or `*` means any origin.
    pub fn parse(raw: Option<&str>) -> anyhow::Result<Self> {
        let raw = raw.map(str::trim).unwrap_or_default();
        if raw.is_empty() || raw == "*" {
            return Ok(Self::AnyOrigin);
        }
        let origins = raw
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(|o| {
                HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {o}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::Origins(origins))
    }

    pub(super) fn layer(&self) -> CorsLayer {
        let base = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        match self {
            Self::AnyOrigin => {
                tracing::warn!("UH_CORS_ORIGINS not set; any origin may call the API");
                base.allow_origin(AllowOrigin::any())
            }
            Self::Origins(origins) => base
                .allow_origin(AllowOrigin::list(origins.iter().cloned()))
                .allow_credentials(true),
        }
    }
}
