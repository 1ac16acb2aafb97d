use regex::Regex;
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";
const POTENTIAL_TOKEN: &str = "[POTENTIAL_TOKEN_REDACTED]";
const JWT: &str = "[JWT_REDACTED]";
const API_KEY: &str = "[API_KEY_REDACTED]";

/// Field names (case-insensitive substring match) whose values are always
/// replaced wholesale, whatever their type.
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "key",
    "auth",
    "credential",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "bearer",
    "private",
    "session",
];

const SECRET_PREFIXES: &[&str] = &["sk_", "pk_", "bearer ", "basic "];

/// Sanitizes captured values before they are serialized onto the timeline.
///
/// Works on the whole JSON tree: field-name rules apply at every object
/// level, content rules to every string leaf. Redaction never fails; when in
/// doubt it redacts.
#[derive(Debug, Clone)]
pub struct Redactor {
    base64_like: Regex,
    jwt: Regex,
}

impl Redactor {
    pub fn new() -> Self {
        // The patterns are anchored, so a partial match never redacts.
        Self {
            base64_like: Regex::new(r"^[A-Za-z0-9+/=]{20,}$").expect("static pattern"),
            jwt: Regex::new(r"^eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$")
                .expect("static pattern"),
        }
    }

    /// Returns the sanitized form of `value`.
    pub fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let map = map
                    .into_iter()
                    .map(|(name, field)| {
                        let sensitive = Self::is_sensitive_field(&name);
                        let field = self.redact_field(field, sensitive);
                        (name, field)
                    })
                    .collect();
                Value::Object(map)
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|item| self.redact(item)).collect())
            }
            Value::String(s) => Value::String(self.redact_string(s, false)),
            other => other,
        }
    }

    fn redact_field(&self, value: Value, sensitive_name: bool) -> Value {
        match value {
            // Content shape beats the field-name rule: a JWT in a field
            // named "token" reports as a JWT, not a generic secret.
            Value::String(s) => Value::String(self.redact_string(s, sensitive_name)),
            _ if sensitive_name => Value::String(REDACTED.to_string()),
            other => self.redact(other),
        }
    }

    fn redact_string(&self, s: String, sensitive_name: bool) -> String {
        if s.chars().count() > 16 {
            if self.base64_like.is_match(&s) {
                return POTENTIAL_TOKEN.to_string();
            }
            if self.jwt.is_match(&s) {
                return JWT.to_string();
            }
            let lowered = s.to_lowercase();
            if SECRET_PREFIXES.iter().any(|p| lowered.starts_with(p)) {
                return API_KEY.to_string();
            }
        }
        if sensitive_name {
            return REDACTED.to_string();
        }
        s
    }

    fn is_sensitive_field(name: &str) -> bool {
        let lowered = name.to_lowercase();
        SENSITIVE_FIELDS.iter().any(|f| lowered.contains(f))
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}
