use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

/// Two-system operations that can leave the provider and the store diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    UpdateProfile,
    DeleteAccount,
    SetAdmin,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::UpdateProfile => "update_profile",
            Operation::DeleteAccount => "delete_account",
            Operation::SetAdmin => "set_admin",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of a provider write that succeeded while the matching local write
/// did not. Needs manual reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub uid: String,
    pub operation: Operation,
    /// The provider-side step that already took effect.
    pub provider_step: &'static str,
    pub fields: Vec<String>,
    pub error: String,
    pub at: DateTime<Utc>,
}

impl Incident {
    pub fn new(
        uid: impl Into<String>,
        operation: Operation,
        provider_step: &'static str,
        fields: Vec<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            uid: uid.into(),
            operation,
            provider_step,
            fields,
            error: error.to_string(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {} diverged after '{}': {}",
            self.operation, self.uid, self.provider_step, self.error
        )
    }
}

/// Operator channel for critical inconsistencies.
pub trait IncidentSink: Send + Sync {
    fn report(&self, incident: &Incident);
}

/// Emits incidents as ERROR events on the `userhub::integrity` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIncidentSink;

impl IncidentSink for LogIncidentSink {
    fn report(&self, incident: &Incident) {
        error!(
            target: "userhub::integrity",
            severity = "CRITICAL",
            uid = %incident.uid,
            operation = %incident.operation,
            provider_step = incident.provider_step,
            fields = ?incident.fields,
            error = %incident.error,
            at = %incident.at.to_rfc3339(),
            "identity provider and profile store diverged; manual reconciliation required"
        );
    }
}
