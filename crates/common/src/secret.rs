//! Redacting wrapper for credentials held in configuration

use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Sensitive value (client secrets, cron secret). Redacted in Debug/Display
/// and zeroed on drop.
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Constant-time comparison against a presented value, used for
    /// bearer-style checks such as the cron secret.
    pub fn matches(&self, presented: &str) -> bool {
        self.0.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

/// Short prefix of a token suitable for logs and API responses.
///
/// Keeps the first `len` characters and appends `...`.
pub fn preview(token: &str, len: usize) -> String {
    let head: String = token.chars().take(len).collect();
    format!("{head}...")
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("cron-secret-value"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn secret_exposes_value() {
        let secret = Secret::new(String::from("client-secret"));
        assert_eq!(secret.expose(), "client-secret");
    }

    #[test]
    fn matches_requires_exact_value() {
        let secret = Secret::new(String::from("s3cret"));
        assert!(secret.matches("s3cret"));
        assert!(!secret.matches("s3cre"));
        assert!(!secret.matches("s3creT"));
        assert!(!secret.matches(""));
        assert!(!secret.matches("s3cret-and-more"));
    }

    #[test]
    fn preview_truncates_and_marks() {
        assert_eq!(preview("abcdefghijklmnopqrstuvwxyz", 20), "abcdefghijklmnopqrst...");
        assert_eq!(preview("short", 20), "short...");
    }
}
