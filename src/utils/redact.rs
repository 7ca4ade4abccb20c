use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["token", "cookie", "authorization", "password", "secret", "d"]
        .into_iter()
        .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\bxoxe\.xox[a-z]-[0-9A-Za-z-]{6,}").expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
        (
            Regex::new(r"\bxox[a-z]-[0-9A-Za-z%.-]{6,}").expect("inline redaction regex"),
            INLINE_REDACTION,
        ),
        (
            Regex::new(r"\b(d)=([^;\s&]{10,})").expect("inline redaction regex"),
            "$1=***REDACTED***",
        ),
        (
            Regex::new(r"\b(Bearer)\s+([A-Za-z0-9._~-]{10,})\b").expect("inline redaction regex"),
            "$1 ***REDACTED***",
        ),
        (
            Regex::new(r#"\b(token|cookie|secret)\b\s*([:=])\s*([^\s"'`&]+)"#)
                .expect("inline redaction regex"),
            "$1$2***REDACTED***",
        ),
    ]
});

pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEYS.contains(normalized.as_str())
        || normalized.contains("secret")
        || normalized.contains("token")
}

/// Scrubs inline credentials and any `extra_secrets`, then truncates to
/// `max_bytes` without splitting a UTF-8 sequence.
pub fn redact_text(value: &str, max_bytes: usize, extra_secrets: Option<&[String]>) -> String {
    let mut out = value.to_string();
    if let Some(values) = extra_secrets {
        for raw in values {
            let needle = raw.trim();
            if needle.len() < 6 {
                continue;
            }
            out = out.replace(needle, INLINE_REDACTION);
        }
    }
    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    if out.len() <= max_bytes {
        return out;
    }
    format!("{}...", truncate_utf8_prefix(&out, max_bytes))
}

/// Redacts sensitive keys of a JSON value, recursively.
pub fn redact_params(value: &Value) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text, usize::MAX, None)),
        Value::Array(items) => Value::Array(items.iter().map(redact_params).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String(DEFAULT_REDACTION.to_string()))
                    } else {
                        (key.clone(), redact_params(entry))
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}
