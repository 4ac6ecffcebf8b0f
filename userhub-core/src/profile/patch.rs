//! Parsing and validation of partial profile updates.

use std::borrow::Cow;

use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{Map, Value};
use validator::Validate;

use super::{Gender, Profile, MAX_DISPLAY_NAME_CHARS};
use crate::error::{FieldIssue, ValidationFailure};
use crate::identity::AccountUpdate;

pub const MINIMUM_AGE: i32 = 18;

/// Completed years between `birthday` and `today`.
pub fn age_on(birthday: NaiveDate, today: NaiveDate) -> i32 {
    let before_birthday = (today.month(), today.day()) < (birthday.month(), birthday.day());
    today.year() - birthday.year() - i32::from(before_birthday)
}

/// Field changes submitted by a client. Outer `None` means "not submitted";
/// for the nullable columns `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub birthday: Option<Option<NaiveDate>>,
    pub gender: Option<Option<Gender>>,
}

#[derive(Validate)]
struct AccountFields {
    #[validate(email(message = "value is not a valid email address"))]
    email: Option<String>,
    #[validate(length(
        min = 1,
        max = 50,
        message = "display name must be between 1 and 50 characters"
    ))]
    display_name: Option<String>,
}

impl ProfilePatch {
    /// Parse a JSON object, checking ages against the current UTC date.
    pub fn parse(body: &Map<String, Value>) -> Result<Self, ValidationFailure> {
        Self::parse_on(body, Utc::now().date_naive())
    }

    /// Parse a JSON object. Unknown keys are ignored; every failing field is
    /// reported, not just the first.
    pub fn parse_on(body: &Map<String, Value>, today: NaiveDate) -> Result<Self, ValidationFailure> {
        let mut issues = Vec::new();
        let mut patch = ProfilePatch::default();

        for key in ["email", "display_name"] {
            match body.get(key) {
                None => {}
                Some(Value::String(s)) => {
                    let value = Some(s.trim().to_string());
                    if key == "email" {
                        patch.email = value;
                    } else {
                        patch.display_name = value;
                    }
                }
                Some(_) => issues.push(FieldIssue::new(
                    key,
                    "string_type",
                    "input should be a valid string",
                )),
            }
        }

        match body.get("birthday") {
            None => {}
            Some(Value::Null) => patch.birthday = Some(None),
            Some(Value::String(s)) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(date) if age_on(date, today) < MINIMUM_AGE => issues.push(FieldIssue::new(
                    "birthday",
                    "value_error",
                    format!("users under {MINIMUM_AGE} cannot register"),
                )),
                Ok(date) => patch.birthday = Some(Some(date)),
                Err(_) => issues.push(FieldIssue::new(
                    "birthday",
                    "date_parsing",
                    "input should be a valid date in the format YYYY-MM-DD",
                )),
            },
            Some(_) => issues.push(FieldIssue::new(
                "birthday",
                "date_type",
                "input should be a valid date",
            )),
        }

        match body.get("gender") {
            None => {}
            Some(Value::Null) => patch.gender = Some(None),
            Some(value) => match value.as_str().map(str::parse::<Gender>) {
                Some(Ok(gender)) => patch.gender = Some(Some(gender)),
                _ => issues.push(FieldIssue::new(
                    "gender",
                    "enum",
                    "input should be 'male', 'female', 'other' or 'prefer_not_to_say'",
                )),
            },
        }

        let account_fields = AccountFields {
            email: patch.email.clone(),
            display_name: patch.display_name.clone(),
        };
        if let Err(errors) = account_fields.validate() {
            for (field, errs) in errors.field_errors() {
                for err in errs.iter() {
                    let message = err
                        .message
                        .clone()
                        .unwrap_or_else(|| Cow::from(err.code.to_string()));
                    issues.push(FieldIssue::new(
                        field.to_string(),
                        err.code.to_string(),
                        message.to_string(),
                    ));
                }
            }
        }

        if issues.is_empty() {
            Ok(patch)
        } else {
            issues.sort_by(|a, b| a.location.cmp(&b.location));
            Err(ValidationFailure { issues })
        }
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    /// Whether the patch changes fields held by the identity provider.
    pub fn touches_account(&self) -> bool {
        self.email.is_some() || self.display_name.is_some()
    }

    pub fn account_update(&self) -> AccountUpdate {
        AccountUpdate {
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            disabled: None,
        }
    }

    /// Apply the profile-table fields. Email lives only on the account.
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(name) = &self.display_name {
            profile.display_name = name.clone();
        }
        if let Some(birthday) = self.birthday {
            profile.birthday = birthday;
        }
        if let Some(gender) = self.gender {
            profile.gender = gender;
        }
    }

    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.email.is_some() {
            fields.push("email");
        }
        if self.display_name.is_some() {
            fields.push("display_name");
        }
        if self.birthday.is_some() {
            fields.push("birthday");
        }
        if self.gender.is_some() {
            fields.push("gender");
        }
        fields
    }
}

/// Clamp a provider display name to the profile column width.
pub(crate) fn clamp_display_name(name: &str) -> String {
    name.chars().take(MAX_DISPLAY_NAME_CHARS).collect()
}
