//! Operation descriptors and outcomes.
//!
//! # Responsibilities
//! - Name the seven kinds of instrumented business operations
//! - Carry the immutable per-envelope descriptor (kind, subtype, fixed labels)
//! - Carry the per-invocation outcome handed to every sink
//!
//! # Design Decisions
//! - Descriptors are built once when an envelope is attached and never mutated
//! - Attribute maps are ordered (`BTreeMap`) so records and spans are deterministic

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of instrumented operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Authentication,
    UserOperation,
    PasswordOperation,
    TokenOperation,
    DatabaseOperation,
    Authorization,
    SecurityEvent,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Authentication,
        OperationKind::UserOperation,
        OperationKind::PasswordOperation,
        OperationKind::TokenOperation,
        OperationKind::DatabaseOperation,
        OperationKind::Authorization,
        OperationKind::SecurityEvent,
    ];

    /// Stable snake_case name, used as the log `event_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Authentication => "authentication",
            OperationKind::UserOperation => "user_operation",
            OperationKind::PasswordOperation => "password_operation",
            OperationKind::TokenOperation => "token_operation",
            OperationKind::DatabaseOperation => "database_operation",
            OperationKind::Authorization => "authorization",
            OperationKind::SecurityEvent => "security",
        }
    }

    /// Prefix for span names and span attributes.
    pub fn span_prefix(&self) -> &'static str {
        match self {
            OperationKind::Authentication => "auth",
            OperationKind::UserOperation => "user",
            OperationKind::PasswordOperation => "password",
            OperationKind::TokenOperation => "token",
            OperationKind::DatabaseOperation => "db",
            OperationKind::Authorization => "authz",
            OperationKind::SecurityEvent => "security",
        }
    }

    /// Human label used in log messages.
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Authentication => "Authentication",
            OperationKind::UserOperation => "User operation",
            OperationKind::PasswordOperation => "Password operation",
            OperationKind::TokenOperation => "Token operation",
            OperationKind::DatabaseOperation => "Database operation",
            OperationKind::Authorization => "Authorization",
            OperationKind::SecurityEvent => "Security event",
        }
    }

    /// Label key under which the subtype is exported as a metric label.
    pub fn subtype_label(&self) -> &'static str {
        match self {
            OperationKind::Authentication => "auth_type",
            OperationKind::SecurityEvent => "event_type",
            _ => "operation_type",
        }
    }

    /// Business kinds can be switched off together by configuration.
    pub fn is_business(&self) -> bool {
        !matches!(self, OperationKind::DatabaseOperation)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of an instrumented call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDescriptor {
    kind: OperationKind,
    subtype: Cow<'static, str>,
    extra_labels: BTreeMap<String, String>,
}

impl OperationDescriptor {
    pub fn new(kind: OperationKind, subtype: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            subtype: subtype.into(),
            extra_labels: BTreeMap::new(),
        }
    }

    /// Attach a fixed label. Only meant for bounded values known at decoration time.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_labels.insert(key.into(), value.into());
        self
    }

    /// `auth_type` is one of login, refresh, verify.
    pub fn authentication(auth_type: &'static str) -> Self {
        Self::new(OperationKind::Authentication, auth_type)
    }

    pub fn user_operation(operation_type: &'static str) -> Self {
        Self::new(OperationKind::UserOperation, operation_type)
    }

    /// Password operation; `record_security` also emits a `password_changed` security event
    /// on success.
    pub fn password_operation(operation_type: &'static str, record_security: bool) -> Self {
        Self::new(OperationKind::PasswordOperation, operation_type)
            .with_label("record_security", record_security.to_string())
    }

    pub fn token_operation(operation_type: &'static str, token_type: &'static str) -> Self {
        Self::new(OperationKind::TokenOperation, operation_type)
            .with_label("token_type", token_type)
    }

    pub fn database_operation(operation_type: &'static str, table: &'static str) -> Self {
        Self::new(OperationKind::DatabaseOperation, operation_type).with_label("table", table)
    }

    pub fn authorization(resource: &'static str, action: &'static str) -> Self {
        Self::new(OperationKind::Authorization, "check")
            .with_label("resource", resource)
            .with_label("action", action)
    }

    pub fn security_event(event_type: &'static str, severity: &'static str) -> Self {
        Self::new(OperationKind::SecurityEvent, event_type).with_label("severity", severity)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.extra_labels.get(key).map(String::as_str)
    }

    pub fn extra_labels(&self) -> &BTreeMap<String, String> {
        &self.extra_labels
    }

    /// Whether a label carries the literal `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.label(key) == Some("true")
    }
}

/// A value attached to an outcome, log record, or span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(i) => Some(*i as f64),
            AttrValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<u64> for AttrValue {
    fn from(value: u64) -> Self {
        AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<uuid::Uuid> for AttrValue {
    fn from(value: uuid::Uuid) -> Self {
        AttrValue::Str(value.to_string())
    }
}

/// Operation-specific attributes (user id, token type, ...).
pub type Attributes = BTreeMap<String, AttrValue>;

/// Status of a settled invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "success",
            OutcomeStatus::Failure => "failure",
            OutcomeStatus::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened during one envelope invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub status: OutcomeStatus,
    pub duration_seconds: f64,
    /// Set only when `status` is failure (or error on cancellation).
    pub failure_reason: Option<String>,
    /// Set only when `status` is error.
    pub error: Option<String>,
    pub result_attributes: Attributes,
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn attribute(&self, key: &str) -> Option<&AttrValue> {
        self.result_attributes.get(key)
    }

    /// String attribute lookup.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attribute(key).and_then(AttrValue::as_str)
    }
}
