use axum::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::FromRequest;
use axum::http::header::CONTENT_TYPE;
use axum::http::Request;
use serde_json::{Map, Value};
use tracing::info;
use userhub_core::FieldIssue;

use super::error::ApiError;

/// JSON object request body. Must be the last handler argument, so it is
/// always extracted after every authorization stage has passed.
#[derive(Debug, Clone)]
pub struct Payload(pub Map<String, Value>);

fn is_json_content_type(value: &str) -> bool {
    let mime = value.split(';').next().unwrap_or_default().trim();
    mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
}

#[async_trait]
impl<S: Send + Sync> FromRequest<S> for Payload {
    type Rejection = ApiError;

    async fn from_request(req: Request<Body>, state: &S) -> Result<Self, Self::Rejection> {
        let json_content = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_json_content_type)
            .unwrap_or(false);

        let bytes = Bytes::from_request(req, state).await.map_err(|e| {
            info!(error = %e, "could not read request body");
            ApiError::invalid_json()
        })?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            info!("request body is missing or empty");
            return Err(ApiError::missing_payload());
        }
        if !json_content {
            info!("request body is not declared as JSON");
            return Err(ApiError::invalid_json());
        }

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Payload(map)),
            Ok(Value::Null) => Err(ApiError::missing_payload()),
            Ok(_) => {
                info!("request body is not a JSON object");
                Err(ApiError::invalid_json())
            }
            Err(e) => {
                info!(error = %e, "could not parse JSON body");
                Err(ApiError::invalid_json())
            }
        }
    }
}

impl Payload {
    /// A required, non-empty string field.
    pub fn string(&self, key: &str) -> Result<String, FieldIssue> {
        match self.0.get(key) {
            None => Err(FieldIssue::new(key, "missing", "field required")),
            Some(Value::String(s)) if s.trim().is_empty() => Err(FieldIssue::new(
                key,
                "string_too_short",
                "string should have at least 1 character",
            )),
            Some(Value::String(s)) => Ok(s.trim().to_string()),
            Some(_) => Err(FieldIssue::new(
                key,
                "string_type",
                "input should be a valid string",
            )),
        }
    }

    /// A required boolean field. Strings like `"true"` are rejected.
    pub fn boolean(&self, key: &str) -> Result<bool, FieldIssue> {
        match self.0.get(key) {
            None => Err(FieldIssue::new(key, "missing", "field required")),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(FieldIssue::new(
                key,
                "bool_type",
                "input should be a valid boolean",
            )),
        }
    }
}

/// Combine two field results, reporting every failure at once.
pub fn both<A, B>(
    a: Result<A, FieldIssue>,
    b: Result<B, FieldIssue>,
) -> Result<(A, B), ApiError> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (a, b) => Err(ApiError::validation(
            [a.err(), b.err()].into_iter().flatten().collect(),
        )),
    }
}
