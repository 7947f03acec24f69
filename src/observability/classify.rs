//! Outcome classification.
//!
//! The envelope cannot know what "failure" means for a given operation: an
//! authentication that returns no user is a failure, an authorization check
//! that returns `false` is a denial, a domain error such as "account locked"
//! is a failure while a storage error is an error. Callers supply that
//! mapping per call site through [`AttributeExtractor`].

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::observability::descriptor::{AttrValue, Attributes, OutcomeStatus};

/// The classified result of a settled call.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub status: OutcomeStatus,
    pub failure_reason: Option<String>,
    pub error: Option<String>,
    pub attributes: Attributes,
}

impl Settled {
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            failure_reason: None,
            error: None,
            attributes: Attributes::new(),
        }
    }

    /// Expected negative outcome with a bounded reason category.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            failure_reason: Some(reason.into()),
            error: None,
            attributes: Attributes::new(),
        }
    }

    /// Unexpected error, captured as a description.
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            failure_reason: None,
            error: Some(description.into()),
            attributes: Attributes::new(),
        }
    }

    /// The wrapped call was dropped before it settled.
    pub fn cancelled() -> Self {
        Self {
            status: OutcomeStatus::Error,
            failure_reason: Some("cancelled".to_string()),
            error: Some("operation cancelled before completion".to_string()),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Domain errors that represent expected business failures.
///
/// Returning `Some(category)` makes the envelope record `failure` with that
/// category as the reason; `None` records `error`.
pub trait FailureCategory {
    fn failure_category(&self) -> Option<Cow<'static, str>>;
}

impl FailureCategory for std::convert::Infallible {
    fn failure_category(&self) -> Option<Cow<'static, str>> {
        match *self {}
    }
}

/// Derives outcome status and attributes for one call site.
pub trait AttributeExtractor<T, E>: Send + Sync {
    /// Attributes known before the call runs (derived from its arguments).
    fn before(&self) -> Attributes {
        Attributes::new()
    }

    /// Raw identity (usually an email) for the correlation context; masked before use.
    fn identity(&self) -> Option<&str> {
        None
    }

    fn on_ok(&self, value: &T) -> Settled;

    fn on_err(&self, error: &E) -> Settled;
}

/// Classify an error through [`FailureCategory`].
pub fn classify_error<E>(error: &E) -> Settled
where
    E: FailureCategory + fmt::Display,
{
    match error.failure_category() {
        Some(category) => {
            Settled::failure(category).with_attribute("error_message", error.to_string())
        }
        None => Settled::error(error.to_string()),
    }
}

/// Every `Ok` is a success; errors go through [`FailureCategory`].
#[derive(Debug, Clone, Default)]
pub struct ResultExtractor {
    attributes: Attributes,
}

impl ResultExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl<T, E> AttributeExtractor<T, E> for ResultExtractor
where
    E: FailureCategory + fmt::Display,
{
    fn before(&self) -> Attributes {
        self.attributes.clone()
    }

    fn on_ok(&self, _value: &T) -> Settled {
        Settled::success()
    }

    fn on_err(&self, error: &E) -> Settled {
        classify_error(error)
    }
}

/// Extractor built from two closures.
pub struct FnExtractor<O, R> {
    on_ok: O,
    on_err: R,
}

/// Build an extractor from closures for the success and error paths.
pub fn from_fns<O, R>(on_ok: O, on_err: R) -> FnExtractor<O, R> {
    FnExtractor { on_ok, on_err }
}

impl<T, E, O, R> AttributeExtractor<T, E> for FnExtractor<O, R>
where
    O: Fn(&T) -> Settled + Send + Sync,
    R: Fn(&E) -> Settled + Send + Sync,
{
    fn on_ok(&self, value: &T) -> Settled {
        (self.on_ok)(value)
    }

    fn on_err(&self, error: &E) -> Settled {
        (self.on_err)(error)
    }
}

/// Entities that carry a user identifier.
pub trait Subject {
    fn subject_id(&self) -> String;
}

/// Authentication returns `Ok(None)` when credentials are rejected.
#[derive(Debug, Clone)]
pub struct AuthenticationExtractor {
    email: Option<String>,
}

impl AuthenticationExtractor {
    pub fn for_email(email: impl Into<String>) -> Self {
        Self { email: Some(email.into()) }
    }

    pub fn anonymous() -> Self {
        Self { email: None }
    }
}

impl<U, E> AttributeExtractor<Option<U>, E> for AuthenticationExtractor
where
    U: Subject,
    E: FailureCategory + fmt::Display,
{
    fn before(&self) -> Attributes {
        let mut attrs = Attributes::new();
        if let Some(email) = &self.email {
            attrs.insert("email".into(), AttrValue::Str(email.clone()));
        }
        attrs
    }

    fn identity(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn on_ok(&self, value: &Option<U>) -> Settled {
        match value {
            Some(user) => Settled::success().with_attribute("user_id", user.subject_id()),
            None => Settled::failure("invalid_credentials"),
        }
    }

    fn on_err(&self, error: &E) -> Settled {
        classify_error(error)
    }
}

/// Authorization checks return whether access was granted.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationExtractor {
    user_id: Option<String>,
    required_roles: Vec<String>,
    user_roles: Vec<String>,
}

impl AuthorizationExtractor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn roles(mut self, required: &[&str], held: &[&str]) -> Self {
        self.required_roles = required.iter().map(|r| r.to_string()).collect();
        self.user_roles = held.iter().map(|r| r.to_string()).collect();
        self
    }
}

impl<E> AttributeExtractor<bool, E> for AuthorizationExtractor
where
    E: FailureCategory + fmt::Display,
{
    fn before(&self) -> Attributes {
        let mut attrs = Attributes::new();
        if let Some(user_id) = &self.user_id {
            attrs.insert("user_id".into(), AttrValue::Str(user_id.clone()));
        }
        if !self.required_roles.is_empty() {
            attrs.insert("required_roles".into(), AttrValue::Str(self.required_roles.join(",")));
        }
        if !self.user_roles.is_empty() {
            attrs.insert("user_roles".into(), AttrValue::Str(self.user_roles.join(",")));
        }
        attrs
    }

    fn on_ok(&self, granted: &bool) -> Settled {
        if *granted {
            Settled::success().with_attribute("granted", true)
        } else {
            Settled::failure("denied").with_attribute("granted", false)
        }
    }

    fn on_err(&self, error: &E) -> Settled {
        classify_error(error)
    }
}

/// Security events are only recorded as success when the action took effect.
#[derive(Debug, Clone, Default)]
pub struct SecurityEventExtractor {
    user_id: Option<String>,
}

impl SecurityEventExtractor {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()) }
    }
}

impl<E> AttributeExtractor<bool, E> for SecurityEventExtractor
where
    E: FailureCategory + fmt::Display,
{
    fn before(&self) -> Attributes {
        let mut attrs = Attributes::new();
        if let Some(user_id) = &self.user_id {
            attrs.insert("user_id".into(), AttrValue::Str(user_id.clone()));
        }
        attrs
    }

    fn on_ok(&self, applied: &bool) -> Settled {
        if *applied {
            Settled::success()
        } else {
            Settled::failure("not_applied")
        }
    }

    fn on_err(&self, error: &E) -> Settled {
        classify_error(error)
    }
}

/// Token issuance carries the token lifetime; the token itself is never recorded.
#[derive(Debug, Clone)]
pub struct TokenExtractor {
    user_id: Option<String>,
    expires_in: Option<Duration>,
}

impl TokenExtractor {
    pub fn new(user_id: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            expires_in,
        }
    }
}

impl<T, E> AttributeExtractor<T, E> for TokenExtractor
where
    E: FailureCategory + fmt::Display,
{
    fn before(&self) -> Attributes {
        let mut attrs = Attributes::new();
        if let Some(user_id) = &self.user_id {
            attrs.insert("user_id".into(), AttrValue::Str(user_id.clone()));
        }
        attrs
    }

    fn on_ok(&self, _token: &T) -> Settled {
        match self.expires_in {
            Some(ttl) => Settled::success().with_attribute("expires_in_seconds", ttl.as_secs()),
            None => Settled::success(),
        }
    }

    fn on_err(&self, error: &E) -> Settled {
        classify_error(error)
    }
}
