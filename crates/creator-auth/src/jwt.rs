//! Access-token expiry decoding
//!
//! Partner access tokens are JWTs. Only the `exp` claim is read, to avoid
//! refreshing a token that is still good. The signature is never verified:
//! the partner API is the trust boundary, not this process.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

/// Decode the `exp` claim (seconds since epoch) from a compact JWT.
///
/// Accepts both the URL-safe and standard base64 alphabets, padded or not.
/// Returns `None` for anything that isn't three dot-separated parts with a
/// JSON payload carrying a numeric `exp`.
pub fn decode_exp(token: &str) -> Option<i64> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD.decode(normalized).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

    let exp = claims.get("exp")?;
    exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))
}

/// Whether `token` must be refreshed before use.
///
/// A token is reusable only when its `exp` lies strictly more than `buffer`
/// after `now`. Undecodable tokens count as expiring.
pub fn is_expiring(token: &str, buffer: Duration, now: DateTime<Utc>) -> bool {
    match decode_exp(token) {
        Some(exp) => exp <= now.timestamp() + buffer.as_secs() as i64,
        None => true,
    }
}
