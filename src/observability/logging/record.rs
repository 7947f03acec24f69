//! Structured log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observability::descriptor::{AttrValue, Attributes, OperationKind, OutcomeStatus};
use crate::observability::privacy::{mask_email, scrub_attributes, scrub_text};
use crate::observability::resource::Resource;
use crate::observability::sink::Recording;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// One structured record per settled operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub event_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub hostname: String,
    pub service: String,
    pub environment: String,
    #[serde(default)]
    pub extra: Attributes,
}

impl LogRecord {
    /// Free-form record, e.g. for process events outside any envelope.
    pub fn new(
        level: LogLevel,
        event_type: impl Into<String>,
        status: impl Into<String>,
        message: impl Into<String>,
        resource: &Resource,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            event_type: event_type.into(),
            status: status.into(),
            duration_seconds: None,
            user_id: None,
            trace_id: None,
            span_id: None,
            hostname: resource.host_name.clone(),
            service: resource.service_name.clone(),
            environment: resource.environment.clone(),
            extra: Attributes::new(),
        }
    }

    /// Build the record for a settled envelope invocation.
    pub fn from_recording(recording: &Recording<'_>, resource: &Resource) -> Self {
        let descriptor = recording.descriptor;
        let outcome = recording.outcome;
        let kind = descriptor.kind();
        let subtype = descriptor.subtype();
        let mut attrs = outcome.result_attributes.clone();

        let user_id = attrs.remove("user_id").map(|v| v.to_string());
        let mut extra = Attributes::new();
        let mut put = |key: &str, value: AttrValue| {
            extra.insert(key.to_string(), value);
        };

        let status_word = match (kind, outcome.status) {
            (OperationKind::Authorization, OutcomeStatus::Success) => "granted",
            (OperationKind::Authorization, OutcomeStatus::Failure) => "denied",
            (_, status) => status.as_str(),
        };
        let mut subject = subtype.to_string();

        match kind {
            OperationKind::Authentication => {
                put("auth_type", subtype.into());
                if let Some(email) = attrs.remove("email") {
                    put("email", mask_email(&email.to_string()).into());
                } else if let Some(identity) = &recording.correlation.masked_identity {
                    put("email", identity.as_str().into());
                }
            }
            OperationKind::UserOperation => {
                put("operation_type", subtype.into());
                if let Some(target) = attrs.remove("target_user_id") {
                    put("target_user_id", target);
                }
            }
            OperationKind::PasswordOperation => {
                put("operation_type", subtype.into());
                put("is_security_event", descriptor.flag("record_security").into());
            }
            OperationKind::TokenOperation => {
                put("operation_type", subtype.into());
                put("token_type", descriptor.label("token_type").unwrap_or("unknown").into());
                if let Some(ttl) = attrs.remove("expires_in_seconds") {
                    put("expires_in_seconds", ttl);
                }
            }
            OperationKind::DatabaseOperation => {
                put("operation_type", subtype.into());
                put("entity_type", descriptor.label("table").unwrap_or("unknown").into());
                if let Some(count) = attrs.remove("record_count") {
                    put("record_count", count);
                }
            }
            OperationKind::Authorization => {
                let resource_name = descriptor.label("resource").unwrap_or("unknown");
                let action = descriptor.label("action").unwrap_or("unknown");
                subject = format!("{}:{}", resource_name, action);
                put("resource", resource_name.into());
                put("action", action.into());
                for key in ["required_roles", "user_roles"] {
                    if let Some(value) = attrs.remove(key) {
                        put(key, value);
                    }
                }
                attrs.remove("granted");
            }
            OperationKind::SecurityEvent => {
                put("security_event_type", subtype.into());
                put("severity", descriptor.label("severity").unwrap_or("medium").into());
            }
        }

        if let Some(reason) = &outcome.failure_reason {
            put("failure_reason", reason.as_str().into());
        }
        if let Some(error) = &outcome.error {
            put("error_message", scrub_text(error).into());
        }
        for (key, value) in attrs {
            extra.entry(key).or_insert(value);
        }

        Self {
            timestamp: Utc::now(),
            level: level_for(recording),
            message: format!("{} {}: {}", kind.label(), status_word, subject),
            event_type: kind.as_str().to_string(),
            status: outcome.status.as_str().to_string(),
            duration_seconds: Some(outcome.duration_seconds),
            user_id,
            trace_id: recording.correlation.trace_id_hex(),
            span_id: recording.correlation.span_id_hex(),
            hostname: resource.host_name.clone(),
            service: resource.service_name.clone(),
            environment: resource.environment.clone(),
            extra,
        }
        .scrubbed()
    }

    /// Apply the privacy policy to every free-text field.
    pub fn scrubbed(mut self) -> Self {
        self.message = scrub_text(&self.message);
        self.user_id = self.user_id.map(|id| scrub_text(&id));
        self.extra = scrub_attributes(self.extra);
        self
    }
}

/// Level mirrored on the diagnostic channel.
fn level_for(recording: &Recording<'_>) -> LogLevel {
    let descriptor = recording.descriptor;
    match (descriptor.kind(), recording.outcome.status) {
        (OperationKind::SecurityEvent, OutcomeStatus::Success) => {
            match descriptor.label("severity") {
                Some("critical") | Some("high") => LogLevel::Error,
                Some("medium") => LogLevel::Warn,
                _ => LogLevel::Info,
            }
        }
        (OperationKind::PasswordOperation, OutcomeStatus::Success)
            if descriptor.flag("record_security") =>
        {
            LogLevel::Warn
        }
        (_, OutcomeStatus::Success) => LogLevel::Info,
        (_, OutcomeStatus::Failure) => LogLevel::Warn,
        (_, OutcomeStatus::Error) => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::correlation::CorrelationContext;
    use crate::observability::descriptor::{OperationDescriptor, OperationOutcome};

    fn outcome(status: OutcomeStatus, attrs: &[(&str, AttrValue)]) -> OperationOutcome {
        OperationOutcome {
            status,
            duration_seconds: 0.01,
            failure_reason: (status == OutcomeStatus::Failure)
                .then(|| "invalid_credentials".to_string()),
            error: None,
            result_attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    fn resource() -> Resource {
        Resource::new("identity-service", "0.1.0", "test")
    }

    #[test]
    fn test_failed_login_record() {
        let d = OperationDescriptor::authentication("login");
        let o = outcome(OutcomeStatus::Failure, &[("email", "a@x.com".into())]);
        let c = CorrelationContext::default();
        let recording = Recording { descriptor: &d, outcome: &o, correlation: &c };
        let record = LogRecord::from_recording(&recording, &resource());

        assert_eq!(record.event_type, "authentication");
        assert_eq!(record.status, "failure");
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.message, "Authentication failure: login");
        assert!(record.user_id.is_none());
        assert!(record.trace_id.is_none());
        assert_eq!(record.extra.get("email"), Some(&AttrValue::Str("*@x.com".into())));
        assert_eq!(
            record.extra.get("failure_reason"),
            Some(&AttrValue::Str("invalid_credentials".into()))
        );
    }

    #[test]
    fn test_authorization_message_uses_grant_words() {
        let d = OperationDescriptor::authorization("users", "delete");
        let o = outcome(
            OutcomeStatus::Failure,
            &[("user_id", "u-7".into()), ("required_roles", "admin".into())],
        );
        let c = CorrelationContext::default();
        let recording = Recording { descriptor: &d, outcome: &o, correlation: &c };
        let record = LogRecord::from_recording(&recording, &resource());
        assert_eq!(record.message, "Authorization denied: users:delete");
        assert_eq!(record.user_id.as_deref(), Some("u-7"));
        assert_eq!(record.extra.get("required_roles"), Some(&AttrValue::Str("admin".into())));
    }

    #[test]
    fn test_secrets_and_emails_never_leak() {
        let d = OperationDescriptor::user_operation("create");
        let o = outcome(
            OutcomeStatus::Success,
            &[("password", "hunter2".into()), ("contact", "bob@example.com".into())],
        );
        let c = CorrelationContext::default();
        let recording = Recording { descriptor: &d, outcome: &o, correlation: &c };
        let record = LogRecord::from_recording(&recording, &resource());
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("bob@example.com"));
        assert!(json.contains("b***@example.com"));
    }

    #[test]
    fn test_error_descriptions_are_masked() {
        let d = OperationDescriptor::user_operation("create");
        let mut o = outcome(OutcomeStatus::Error, &[]);
        o.error = Some("user bob@example.com already registered".to_string());
        let c = CorrelationContext::default();
        let recording = Recording { descriptor: &d, outcome: &o, correlation: &c };
        let record = LogRecord::from_recording(&recording, &resource());

        assert_eq!(
            record.extra.get("error_message"),
            Some(&AttrValue::Str("user b***@example.com already registered".into()))
        );
        assert!(!serde_json::to_string(&record).unwrap().contains("bob@example.com"));
    }

    #[test]
    fn test_security_event_levels() {
        let c = CorrelationContext::default();
        let o = outcome(OutcomeStatus::Success, &[]);
        let high = OperationDescriptor::security_event("account_locked", "high");
        let low = OperationDescriptor::security_event("account_unlocked", "low");
        let high = Recording { descriptor: &high, outcome: &o, correlation: &c };
        assert_eq!(level_for(&high), LogLevel::Error);
        let low = Recording { descriptor: &low, outcome: &o, correlation: &c };
        assert_eq!(level_for(&low), LogLevel::Info);
    }

    #[test]
    fn test_timestamp_is_iso8601() {
        let record = LogRecord::new(LogLevel::Info, "startup", "success", "started", &resource());
        let json = serde_json::to_value(&record).unwrap();
        let ts = json["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }
}
