//! Instrumented identity operations.
//!
//! An in-memory user directory whose every operation runs inside an
//! envelope. It drives the demo binary and the end-to-end tests; there is no
//! real credential storage or hashing behind it.

pub mod directory;

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::observability::classify::{
    classify_error, AttributeExtractor, FailureCategory, Settled, Subject,
};
use crate::observability::descriptor::{AttrValue, Attributes};

pub use directory::UserDirectory;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("account is locked")]
    AccountLocked,

    #[error("account is inactive")]
    AccountInactive,

    #[error("user already exists")]
    AlreadyExists,

    #[error("user not found")]
    NotFound,

    #[error("current password is incorrect")]
    InvalidPassword,

    #[error("password is too short")]
    WeakPassword,

    #[error("invalid email address")]
    InvalidEmail,

    #[error("storage error: {0}")]
    Storage(String),
}

impl FailureCategory for IdentityError {
    fn failure_category(&self) -> Option<Cow<'static, str>> {
        let category = match self {
            IdentityError::AccountLocked => "account_locked",
            IdentityError::AccountInactive => "account_inactive",
            IdentityError::AlreadyExists => "user_already_exists",
            IdentityError::NotFound => "user_not_found",
            IdentityError::InvalidPassword => "invalid_password",
            IdentityError::WeakPassword => "weak_password",
            IdentityError::InvalidEmail => "invalid_email",
            IdentityError::Storage(_) => return None,
        };
        Some(Cow::Borrowed(category))
    }
}

#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub active: bool,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    password: String,
}

impl User {
    pub(crate) fn new(
        email: String,
        display_name: String,
        password: String,
        roles: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            display_name,
            roles,
            active: true,
            locked: false,
            created_at: Utc::now(),
            last_login: None,
            password,
        }
    }

    pub(crate) fn password_matches(&self, candidate: &str) -> bool {
        self.password == candidate
    }

    pub(crate) fn set_password(&mut self, password: String) {
        self.password = password;
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl Subject for User {
    fn subject_id(&self) -> String {
        self.id.to_string()
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("roles", &self.roles)
            .field("active", &self.active)
            .field("locked", &self.locked)
            .finish_non_exhaustive()
    }
}

/// Registration request.
#[derive(Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub roles: Vec<String>,
}

impl NewUser {
    pub fn new(
        email: impl Into<String>,
        display_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            display_name: display_name.into(),
            password: password.into(),
            roles: vec!["user".to_string()],
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// Issued access token. The value itself is never recorded.
#[derive(Clone)]
pub struct AccessToken {
    pub user_id: Uuid,
    pub value: String,
    pub expires_in: Duration,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("user_id", &self.user_id)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// User operations: the affected user id on success, plus the target before the call.
#[derive(Debug, Clone, Default)]
pub(crate) struct UserExtractor {
    email: Option<String>,
    target: Option<Uuid>,
}

impl UserExtractor {
    pub(crate) fn registering(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            target: None,
        }
    }

    pub(crate) fn targeting(user_id: Uuid) -> Self {
        Self {
            email: None,
            target: Some(user_id),
        }
    }
}

impl AttributeExtractor<User, IdentityError> for UserExtractor {
    fn before(&self) -> Attributes {
        let mut attrs = Attributes::new();
        if let Some(email) = &self.email {
            attrs.insert("email".into(), AttrValue::Str(email.clone()));
        }
        if let Some(target) = self.target {
            attrs.insert("target_user_id".into(), target.into());
        }
        attrs
    }

    fn identity(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn on_ok(&self, user: &User) -> Settled {
        Settled::success().with_attribute("user_id", user.subject_id())
    }

    fn on_err(&self, error: &IdentityError) -> Settled {
        classify_error(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::descriptor::OutcomeStatus;

    #[test]
    fn test_failure_categories() {
        assert_eq!(
            IdentityError::AccountLocked.failure_category().as_deref(),
            Some("account_locked")
        );
        assert!(IdentityError::Storage("disk".into()).failure_category().is_none());
        let storage = classify_error(&IdentityError::Storage("disk".into()));
        assert_eq!(storage.status, OutcomeStatus::Error);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let user = User::new("a@x.com".into(), "A".into(), "hunter22".into(), vec![]);
        let text = format!("{:?}", user);
        assert!(!text.contains("hunter22"));
        assert!(!text.contains("a@x.com"));
    }

    #[test]
    fn test_user_extractor_vocabulary() {
        let user = User::new("a@x.com".into(), "A".into(), "hunter22".into(), vec![]);
        let extractor = UserExtractor::registering("a@x.com");
        assert_eq!(
            AttributeExtractor::<User, IdentityError>::before(&extractor).get("email"),
            Some(&AttrValue::Str("a@x.com".into()))
        );
        let settled = extractor.on_ok(&user);
        assert_eq!(settled.attributes.get("user_id"), Some(&AttrValue::Str(user.id.to_string())));
    }
}
