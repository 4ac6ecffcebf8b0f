use serde::Serialize;
use thiserror::Error;

use crate::coordinator::Incident;

/// Common result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures reported by an identity provider client.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("id token has expired")]
    TokenExpired,
    #[error("invalid id token: {0}")]
    InvalidToken(String),
    #[error("id token has been revoked")]
    TokenRevoked,
    #[error("user account is disabled")]
    UserDisabled,
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("email address already in use")]
    EmailAlreadyExists,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("identity provider error: {0}")]
    Service(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Service(err.to_string())
    }
}

/// Failures reported by the profile store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt profile row {uid}: {reason}")]
    Corrupt { uid: String, reason: String },
}

/// One failing field of a submitted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub location: String,
    pub message: String,
    pub kind: String,
}

impl FieldIssue {
    pub fn new(
        location: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Field-level validation failure; never empty.
#[derive(Debug, Clone, Error)]
#[error("validation failed on {} field(s)", .issues.len())]
pub struct ValidationFailure {
    pub issues: Vec<FieldIssue>,
}

/// Conditions that should be structurally impossible and need an operator.
#[derive(Debug, Error)]
pub enum IntegrityFault {
    #[error("no profile row for verified account {uid}")]
    MissingProfile { uid: String },
    #[error("{0}")]
    PartialWrite(Box<Incident>),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error("profile already exists for {0}")]
    ProfileExists(String),
    #[error(transparent)]
    Integrity(#[from] IntegrityFault),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Store(StoreError::Database(err))
    }
}

impl CoreError {
    pub fn missing_profile(uid: impl Into<String>) -> Self {
        CoreError::Integrity(IntegrityFault::MissingProfile { uid: uid.into() })
    }
}
