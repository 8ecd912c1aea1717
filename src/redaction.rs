//! Strips sensitive fields from structured payloads before they are logged.

use serde_json::{Map, Value};

pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Normalised key names (lowercase, no `_`/`-`) whose values are never logged.
const SENSITIVE_KEYS: &[&str] = &[
    "email",
    "emailaddress",
    "password",
    "passwd",
    "secret",
    "token",
    "accesstoken",
    "refreshtoken",
    "idtoken",
    "apikey",
    "authorization",
    "phone",
    "phonenumber",
];

/// Whether `key` names a sensitive field. Case, `_` and `-` are ignored, so
/// `Access_Token`, `access-token` and `accessToken` all match.
pub fn is_sensitive_key(key: &str) -> bool {
    let normalised: String = key
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.contains(&normalised.as_str())
}

/// Deep copy of `value` with every sensitive field replaced by
/// [`REDACTION_MARKER`], at any depth. Scalars and `null` come back unchanged.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let v = if is_sensitive_key(key) {
                        Value::String(REDACTION_MARKER.to_string())
                    } else {
                        redact(v)
                    };
                    (key.clone(), v)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        scalar => scalar.clone(),
    }
}
