//! Per-kind span vocabulary.

use crate::observability::descriptor::{
    AttrValue, Attributes, OperationDescriptor, OperationKind, OperationOutcome, OutcomeStatus,
};
use crate::observability::privacy::{mask_email, scrub_text};
use crate::observability::tracing::span::SpanStatus;

pub const DB_SYSTEM: &str = "mssql";

/// `<prefix>.<subtype>`, e.g. `auth.login`.
pub fn span_name(descriptor: &OperationDescriptor) -> String {
    format!("{}.{}", descriptor.kind().span_prefix(), descriptor.subtype())
}

/// Attributes known when the span starts: descriptor fields plus caller-supplied inputs.
pub fn start_attributes(descriptor: &OperationDescriptor, inputs: &Attributes) -> Attributes {
    let mut attrs = Attributes::new();
    let subtype = descriptor.subtype().to_string();

    match descriptor.kind() {
        OperationKind::Authentication => {
            attrs.insert("auth.type".into(), subtype.into());
        }
        OperationKind::UserOperation => {
            attrs.insert("user.operation.type".into(), subtype.into());
        }
        OperationKind::PasswordOperation => {
            attrs.insert("password.operation.type".into(), subtype.into());
            attrs.insert(
                "password.is_security_event".into(),
                descriptor.flag("record_security").into(),
            );
        }
        OperationKind::TokenOperation => {
            attrs.insert("token.operation.type".into(), subtype.into());
            if let Some(token_type) = descriptor.label("token_type") {
                attrs.insert("token.type".into(), token_type.into());
            }
        }
        OperationKind::DatabaseOperation => {
            attrs.insert("db.operation".into(), subtype.into());
            attrs.insert("db.system".into(), DB_SYSTEM.into());
            if let Some(table) = descriptor.label("table") {
                attrs.insert("db.sql.table".into(), table.into());
            }
        }
        OperationKind::Authorization => {
            if let Some(resource) = descriptor.label("resource") {
                attrs.insert("authz.resource".into(), resource.into());
            }
            if let Some(action) = descriptor.label("action") {
                attrs.insert("authz.action".into(), action.into());
            }
        }
        OperationKind::SecurityEvent => {
            attrs.insert("security.event.type".into(), subtype.into());
            if let Some(severity) = descriptor.label("severity") {
                attrs.insert("security.event.severity".into(), severity.into());
            }
        }
    }

    for (key, value) in inputs {
        match key.as_str() {
            "email" => {
                let masked = value.as_str().map(mask_email).unwrap_or_else(|| "***".into());
                attrs.insert("user.email".into(), masked.into());
            }
            "user_id" => {
                attrs.insert("user.id".into(), AttrValue::Str(value.to_string()));
            }
            "target_user_id" => {
                attrs.insert("user.target.id".into(), AttrValue::Str(value.to_string()));
            }
            _ => {}
        }
    }
    attrs
}

/// Attributes and status derived from the settled outcome.
pub fn finish_attributes(
    descriptor: &OperationDescriptor,
    outcome: &OperationOutcome,
) -> (Attributes, SpanStatus) {
    let kind = descriptor.kind();
    let prefix = kind.span_prefix();
    let status = outcome.status.as_str();
    let mut attrs = Attributes::new();

    match kind {
        OperationKind::Authentication => {
            attrs.insert("auth.status".into(), status.into());
            if let Some(reason) = &outcome.failure_reason {
                attrs.insert("auth.failure_reason".into(), reason.as_str().into());
            }
        }
        OperationKind::UserOperation => {
            attrs.insert("user.operation.status".into(), status.into());
        }
        OperationKind::PasswordOperation => {
            attrs.insert("password.operation.status".into(), status.into());
        }
        OperationKind::TokenOperation => {
            attrs.insert("token.operation.status".into(), status.into());
        }
        OperationKind::DatabaseOperation => {
            attrs.insert("db.operation.status".into(), status.into());
        }
        OperationKind::Authorization => {
            attrs.insert("authz.granted".into(), outcome.is_success().into());
        }
        OperationKind::SecurityEvent => {}
    }
    attrs.insert(format!("{}.duration_seconds", prefix), outcome.duration_seconds.into());

    for (key, value) in &outcome.result_attributes {
        let mapped = match key.as_str() {
            "user_id" => "user.id".to_string(),
            "target_user_id" => "user.target.id".to_string(),
            "email" => "user.email".to_string(),
            "granted" => continue,
            other => other.to_string(),
        };
        let value = match value {
            AttrValue::Str(_) => value.clone(),
            other => AttrValue::Str(other.to_string()),
        };
        attrs.entry(mapped).or_insert(value);
    }

    (attrs, span_status(descriptor, outcome))
}

fn span_status(descriptor: &OperationDescriptor, outcome: &OperationOutcome) -> SpanStatus {
    let status = match outcome.status {
        OutcomeStatus::Success => {
            if descriptor.kind() == OperationKind::SecurityEvent
                && matches!(descriptor.label("severity"), Some("high") | Some("critical"))
            {
                SpanStatus::error(format!("Security event: {}", descriptor.subtype()))
            } else {
                SpanStatus::Ok
            }
        }
        OutcomeStatus::Failure => {
            let description = match descriptor.kind() {
                OperationKind::Authorization => "Authorization denied".to_string(),
                _ => outcome.failure_reason.clone().unwrap_or_else(|| "failure".to_string()),
            };
            SpanStatus::error(description)
        }
        OutcomeStatus::Error => SpanStatus::error(
            outcome
                .error
                .clone()
                .or_else(|| outcome.failure_reason.clone())
                .unwrap_or_else(|| "error".to_string()),
        ),
    };
    match status {
        SpanStatus::Error { description } => SpanStatus::error(scrub_text(&description)),
        other => other,
    }
}
