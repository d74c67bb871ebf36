//! Log Redaction Layer
//!
//! Scrubs bot tokens and authorization headers from strings prior to logging.

use regex::Regex;
use std::sync::LazyLock;

/// Three dot-separated base64url segments, the shape of a Discord bot token.
static BOT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[MNO][A-Za-z\d_-]{23,27}\.[A-Za-z\d_-]{6}\.[A-Za-z\d_-]{27,40}").unwrap()
});
static AUTH_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(Bot|Bearer)\s+[A-Za-z0-9\-\._~+/]+=*").unwrap());

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = AUTH_HEADER_RE.replace_all(input, "$1 [REDACTED_TOKEN]");
    BOT_TOKEN_RE
        .replace_all(&redacted, "[REDACTED_TOKEN]")
        .into_owned()
}

/// Redact every string inside a JSON payload.
pub fn redact_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = redact_sensitive_data(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_json),
        serde_json::Value::Object(map) => map.values_mut().for_each(redact_json),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_TOKEN: &str = "MTA5ODc2NTQzMjEwOTg3NjU0.GhIjKl.abcdefghijklmnopqrstuvwxyz0123";

    #[test]
    fn redacts_bare_token() {
        let clean = redact_sensitive_data(&format!("login failed for {FAKE_TOKEN}"));
        assert!(!clean.contains(FAKE_TOKEN));
        assert!(clean.contains("[REDACTED_TOKEN]"));
    }

    #[test]
    fn redacts_authorization_header() {
        let clean = redact_sensitive_data("Authorization: Bot abc.def.ghi");
        assert_eq!(clean, "Authorization: Bot [REDACTED_TOKEN]");
    }

    #[test]
    fn leaves_plain_text() {
        let text = "member 42 failed to confirm in General";
        assert_eq!(redact_sensitive_data(text), text);
    }

    #[test]
    fn redacts_nested_payload() {
        let mut payload = serde_json::json!({"error": {"detail": format!("401 for {FAKE_TOKEN}")}});
        redact_json(&mut payload);
        assert!(!payload.to_string().contains(FAKE_TOKEN));
    }
}
