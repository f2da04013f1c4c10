//! Redacted handling of the HuggingFace Hub token.

use std::fmt;

/// Environment variable the hub token is read from.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

/// A string that redacts its content in Debug and Display output.
///
/// The value is only reachable through [`expose_secret`][SecretString::expose_secret],
/// so configs and errors holding a token can be logged safely.
///
/// ```
/// use vigogne_core::SecretString;
///
/// let token = SecretString::new("hf_abcdef");
/// assert_eq!(format!("{:?}", token), "SecretString([REDACTED])");
/// assert_eq!(token.expose_secret(), "hf_abcdef");
/// ```
#[derive(Clone, Default)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    /// Create a new `SecretString`.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            inner: secret.into(),
        }
    }

    /// Read a secret from an environment variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self::new)
    }

    /// The hub token from `HF_TOKEN`, if any.
    pub fn hub_token() -> Option<Self> {
        Self::from_env(HF_TOKEN_ENV)
    }

    /// Expose the secret value.
    #[inline]
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    /// Check if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redacts() {
        let secret = SecretString::new("hf_secret");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(secret.expose_secret(), "hf_secret");
    }

    #[test]
    fn test_from_env_missing() {
        assert!(SecretString::from_env("VIGOGNE_TEST_TOKEN_THAT_IS_NOT_SET").is_none());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(SecretString::default().is_empty());
    }
}
