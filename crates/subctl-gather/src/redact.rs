//! Masking of credentials in gathered output
//!
//! With sensitive data excluded, every Secret value, every string field whose
//! key names a credential, the `value` of every `name`/`value` pair (container
//! env entries) whose name does, and every credential-looking `key=value` pair
//! or bearer token in logs is replaced by [`REDACTED`]. The last-applied
//! configuration annotation gets the same treatment as the object it mirrors.
//! With sensitive data included the redactor passes everything through
//! untouched.

use std::borrow::Cow;

use regex::Regex;
use serde_json::Value;
use subctl_common::{Error, Result};

/// Replacement for masked values
pub const REDACTED: &str = "REDACTED";

/// Key fragments that mark a value as a credential (compared lower-case)
const SENSITIVE_KEY_FRAGMENTS: [&str; 6] =
    ["token", "password", "psk", "secret", "credential", "privatekey"];

/// Keys that match a fragment but hold public material
const PUBLIC_KEYS: [&str; 2] = ["ca.crt", "secretname"];

const LAST_APPLIED: &str = "kubectl.kubernetes.io/last-applied-configuration";

const LOG_PAIR_PATTERN: &str = r#"(?i)([\w.-]*(?:token|password|passwd|psk|secret|credential|private_?key)[\w.-]*["']?\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s,;"'}\]]+)"#;
const BEARER_PATTERN: &str = r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+";

/// Applies the redaction policy to resources and logs
#[derive(Clone, Debug)]
pub struct Redactor {
    enabled: bool,
    pairs: Regex,
    bearer: Regex,
}

impl Redactor {
    /// Create a redactor; `include_sensitive_data` disables masking
    pub fn new(include_sensitive_data: bool) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                Error::internal_with_context("redact", format!("invalid pattern: {}", e))
            })
        };
        Ok(Self {
            enabled: !include_sensitive_data,
            pairs: compile(LOG_PAIR_PATTERN)?,
            bearer: compile(BEARER_PATTERN)?,
        })
    }

    /// Whether values are being masked
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a field named `key` holds a credential
    pub fn is_sensitive_key(key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        if PUBLIC_KEYS.contains(&key.as_str()) {
            return false;
        }
        let compact: String = key.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        SENSITIVE_KEY_FRAGMENTS.iter().any(|f| compact.contains(f))
    }

    /// Mask credentials inside a resource of the given kind
    pub fn redact_resource(&self, kind: &str, resource: &mut Value) {
        if !self.enabled {
            return;
        }

        if kind == "Secret" {
            for field in ["data", "stringData"] {
                if let Some(Value::Object(entries)) = resource.get_mut(field) {
                    for value in entries.values_mut() {
                        *value = Value::String(REDACTED.to_string());
                    }
                }
            }
        }

        if let Some(Value::Object(annotations)) = resource.pointer_mut("/metadata/annotations") {
            if let Some(value) = annotations.get_mut(LAST_APPLIED) {
                *value = Value::String(self.redact_last_applied(kind, value));
            }
        }

        mask_sensitive_fields(resource);
    }

    /// Secrets lose the annotation entirely; other kinds keep it with the
    /// embedded object redacted, or lose it if it is not valid JSON
    fn redact_last_applied(&self, kind: &str, annotation: &Value) -> String {
        if kind == "Secret" {
            return REDACTED.to_string();
        }
        let Some(text) = annotation.as_str() else {
            return REDACTED.to_string();
        };
        match serde_json::from_str::<Value>(text) {
            Ok(mut embedded) => {
                mask_sensitive_fields(&mut embedded);
                embedded.to_string()
            }
            Err(_) => REDACTED.to_string(),
        }
    }

    /// Mask credentials inside log text
    pub fn redact_log<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.enabled {
            return Cow::Borrowed(text);
        }

        let replacement = format!("${{1}}{}", REDACTED);
        match self.pairs.replace_all(text, replacement.as_str()) {
            Cow::Borrowed(unchanged) => self.bearer.replace_all(unchanged, replacement.as_str()),
            Cow::Owned(masked) => Cow::Owned(
                self.bearer
                    .replace_all(&masked, replacement.as_str())
                    .into_owned(),
            ),
        }
    }
}

fn mask_sensitive_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let sensitive_pair = matches!(
                (map.get("name"), map.get("value")),
                (Some(Value::String(name)), Some(Value::String(_))) if Redactor::is_sensitive_key(name)
            );
            if sensitive_pair {
                map.insert("value".to_string(), Value::String(REDACTED.to_string()));
            }

            for (key, child) in map.iter_mut() {
                if child.is_string() && Redactor::is_sensitive_key(key) {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    mask_sensitive_fields(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_sensitive_fields),
        _ => {}
    }
}
