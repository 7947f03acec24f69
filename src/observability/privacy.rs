//! Privacy policy applied before anything leaves the process.
//!
//! Email addresses are masked to `first-char***@domain` wherever they appear
//! in a string, values stored under secret-looking keys are replaced outright.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::observability::descriptor::{AttrValue, Attributes};

/// Replacement for values under secret keys.
pub const REDACTED: &str = "[REDACTED]";

const SECRET_KEYS: &[&str] = &[
    "password",
    "new_password",
    "old_password",
    "token",
    "access_token",
    "refresh_token",
    "secret",
    "authorization",
    "api_key",
];

/// `local@domain` runs inside free text. Delimiters common in messages
/// (brackets, quotes, separators) end a run.
static EMBEDDED_EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^\s@<>()\[\]{},;:'"`]+@[^\s@<>()\[\]{},;:'"`]+"#).expect("invalid regex")
});

/// Mask an email address, keeping the first character and the domain.
///
/// `john.doe@example.com` becomes `j***@example.com`. Single-character local
/// parts become `*`, values without `@` become `***`.
pub fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return "***".to_string();
    };

    let mut chars = local.chars();
    let masked_local = match (chars.next(), chars.next()) {
        (Some(first), Some(_)) => format!("{}***", first),
        _ => "*".to_string(),
    };

    format!("{}@{}", masked_local, domain)
}

/// True for values shaped like `local@domain` with no whitespace.
pub fn is_email_shaped(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !value.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

/// True if the local part has already been masked by [`mask_email`].
pub fn is_masked_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, _)) => local == "*" || (local.ends_with("***") && local.chars().count() == 4),
        None => false,
    }
}

/// True for canonical hyphenated UUIDs.
pub fn looks_like_uuid(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok() && value.len() == 36
}

/// Whether a key names a secret that must never be emitted.
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SECRET_KEYS.iter().any(|secret| key == *secret || key.ends_with(&format!("_{}", secret)))
}

/// Apply the policy to a single value.
pub fn scrub_value(key: &str, value: AttrValue) -> AttrValue {
    if is_secret_key(key) {
        return AttrValue::Str(REDACTED.to_string());
    }
    match value {
        AttrValue::Str(s) => AttrValue::Str(scrub_text(&s)),
        other => other,
    }
}

/// Apply the policy to every attribute.
pub fn scrub_attributes(attributes: Attributes) -> Attributes {
    attributes
        .into_iter()
        .map(|(key, value)| {
            let value = scrub_value(&key, value);
            (key, value)
        })
        .collect()
}

/// Mask every email address inside a free-form string.
///
/// Already masked addresses are left alone, so scrubbing twice is a no-op.
pub fn scrub_text(value: &str) -> String {
    EMBEDDED_EMAIL
        .replace_all(value, |caps: &Captures<'_>| {
            let candidate = &caps[0];
            if is_masked_email(candidate) {
                candidate.to_string()
            } else {
                mask_email(candidate)
            }
        })
        .into_owned()
}
