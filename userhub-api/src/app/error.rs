use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use userhub_core::{CoreError, FieldIssue, IntegrityFault, ProviderError};

const GENERIC_SERVER_ERROR: &str = "An internal server error occurred.";

#[derive(Debug)]
pub struct ApiError {
    code: &'static str,
    message: String,
    status: StatusCode,
    details: Option<Vec<FieldIssue>>,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldIssue]>,
}

impl ApiError {
    pub fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn missing_header() -> Self {
        Self::new(
            "auth/missing-header",
            StatusCode::UNAUTHORIZED,
            "Authorization header is missing.",
        )
    }

    pub fn invalid_header() -> Self {
        Self::new(
            "auth/invalid-header",
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format. Expected 'Bearer <token>'.",
        )
    }

    pub fn admin_required() -> Self {
        Self::new(
            "auth/admin-required",
            StatusCode::FORBIDDEN,
            "Forbidden: Administrator access is required for this resource.",
        )
    }

    pub fn missing_payload() -> Self {
        Self::new(
            "request/missing-payload",
            StatusCode::BAD_REQUEST,
            "Request body must contain a JSON payload.",
        )
    }

    pub fn invalid_json() -> Self {
        Self::new(
            "request/invalid-json",
            StatusCode::BAD_REQUEST,
            "Failed to decode JSON object. Please check the syntax and Content-Type header.",
        )
    }

    pub fn validation(details: Vec<FieldIssue>) -> Self {
        Self {
            details: Some(details),
            ..Self::new(
                "request/validation-error",
                StatusCode::UNPROCESSABLE_ENTITY,
                "The provided data is invalid. Please check the details.",
            )
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new("request/invalid-argument", StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found() -> Self {
        Self::new(
            "request/not-found",
            StatusCode::NOT_FOUND,
            "The requested resource does not exist.",
        )
    }

    /// A pipeline stage ran without the context an earlier stage should have
    /// attached. Always a wiring bug.
    pub fn contract_violation(what: &str) -> Self {
        tracing::error!(
            target: "userhub::integrity",
            severity = "CRITICAL",
            missing = what,
            "request pipeline contract violated"
        );
        Self::internal()
    }

    pub fn internal() -> Self {
        Self::new(
            "internal/server-error",
            StatusCode::INTERNAL_SERVER_ERROR,
            GENERIC_SERVER_ERROR,
        )
    }

    pub fn unexpected() -> Self {
        Self::new(
            "internal/unexpected-error",
            StatusCode::INTERNAL_SERVER_ERROR,
            GENERIC_SERVER_ERROR,
        )
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::TokenExpired => ApiError::new(
                "auth/id-token-expired",
                StatusCode::UNAUTHORIZED,
                "ID token has expired. Please login again.",
            ),
            ProviderError::InvalidToken(_) => ApiError::new(
                "auth/invalid-id-token",
                StatusCode::UNAUTHORIZED,
                "Invalid ID token provided.",
            ),
            ProviderError::TokenRevoked => ApiError::new(
                "auth/id-token-revoked",
                StatusCode::UNAUTHORIZED,
                "ID token has been revoked. Please login again.",
            ),
            ProviderError::UserDisabled => ApiError::new(
                "auth/user-disabled",
                StatusCode::FORBIDDEN,
                "User account is disabled.",
            ),
            ProviderError::UserNotFound(uid) => {
                tracing::warn!(uid = %uid, "account not found at identity provider");
                ApiError::new(
                    "user/not-found",
                    StatusCode::NOT_FOUND,
                    "The specified user was not found.",
                )
            }
            ProviderError::EmailAlreadyExists => ApiError::new(
                "conflict/email-exists",
                StatusCode::CONFLICT,
                "The email address is already in use by another account.",
            ),
            ProviderError::InvalidArgument(msg) => ApiError::invalid_argument(msg),
            ProviderError::Service(msg) => {
                tracing::error!(error = %msg, "identity provider failure");
                ApiError::new(
                    "provider/service-error",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred with the authentication service.",
                )
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Provider(e) => e.into(),
            CoreError::Store(e) => {
                tracing::error!(error = %e, "profile store failure");
                ApiError::new(
                    "storage/database-error",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred.",
                )
            }
            CoreError::Validation(v) => {
                tracing::info!(fields = v.issues.len(), "payload failed validation");
                ApiError::validation(v.issues)
            }
            CoreError::ProfileExists(uid) => {
                tracing::info!(uid = %uid, "profile already registered");
                ApiError::new(
                    "conflict/profile-exists",
                    StatusCode::CONFLICT,
                    "A profile already exists for this account.",
                )
            }
            CoreError::Integrity(IntegrityFault::MissingProfile { uid }) => {
                tracing::error!(
                    target: "userhub::integrity",
                    severity = "CRITICAL",
                    uid = %uid,
                    "data inconsistency: no profile row for verified account"
                );
                ApiError::internal()
            }
            CoreError::Integrity(IntegrityFault::PartialWrite(incident)) => {
                // already reported on the incident channel
                tracing::error!(
                    uid = %incident.uid,
                    operation = %incident.operation,
                    "request failed after partial write"
                );
                ApiError::internal()
            }
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::info!(error = %rejection.body_text(), "rejected query string");
        ApiError::invalid_argument("The query string is invalid.")
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        tracing::info!(error = %rejection.body_text(), "rejected path parameter");
        ApiError::invalid_argument("The path parameter is invalid.")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: &self.message,
                details: self.details.as_deref(),
            },
        });
        (self.status, body).into_response()
    }
}
