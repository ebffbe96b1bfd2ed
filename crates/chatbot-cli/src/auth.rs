//! Thread ids from forwarded bearer tokens
//!
//! The web layer in front of the bot has already verified the token; here
//! the payload is only decoded to read the conversation id claim.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Read a string (or numeric) claim from a JWT without verifying it.
///
/// Accepts the raw token or an `Authorization` value with a `Bearer ` prefix.
pub fn claim(token: &str, name: &str) -> Option<String> {
    let token = token.trim();
    let token = token.strip_prefix("Bearer ").unwrap_or(token);

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    match value.get(name)? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pick the thread id: explicit id, then the token claim, then a new UUID.
pub fn resolve_thread_id(explicit: Option<&str>, token: Option<&str>, claim_name: &str) -> String {
    if let Some(id) = explicit.filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    if let Some(id) = token.and_then(|t| claim(t, claim_name)) {
        tracing::debug!(claim = claim_name, "thread id taken from auth token");
        return id;
    }
    uuid::Uuid::new_v4().to_string()
}
