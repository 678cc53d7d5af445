//! Administrator secret, supplied through the environment.

use std::fmt;
use subtle::ConstantTimeEq;

use crate::error::ConfigError;

/// Identity recorded on administrator sessions.
pub const ADMIN_IDENTITY: &str = "admin";

/// The administrator password. Never printed.
#[derive(Clone)]
pub struct AdminSecret {
    secret: String,
}

impl AdminSecret {
    /// Read the secret from `var`, requiring at least `min_len` characters.
    pub fn from_env(var: &str, min_len: usize) -> Result<Self, ConfigError> {
        let value = std::env::var(var).map_err(|_| ConfigError::MissingSecret(var.to_string()))?;
        Self::new(var, value, min_len)
    }

    pub fn new(name: &str, secret: impl Into<String>, min_len: usize) -> Result<Self, ConfigError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ConfigError::MissingSecret(name.to_string()));
        }
        if secret.chars().count() < min_len {
            return Err(ConfigError::SecretTooShort {
                name: name.to_string(),
                min: min_len,
            });
        }
        Ok(Self { secret })
    }

    pub fn verify(&self, candidate: &str) -> bool {
        self.secret.as_bytes().ct_eq(candidate.as_bytes()).into()
    }
}

impl fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminSecret(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_or_empty_secrets_are_rejected() {
        assert!(matches!(
            AdminSecret::new("ADMIN_PASSWORD", "", 12),
            Err(ConfigError::MissingSecret(_))
        ));
        assert!(matches!(
            AdminSecret::new("ADMIN_PASSWORD", "tooshort", 12),
            Err(ConfigError::SecretTooShort { min: 12, .. })
        ));
    }

    #[test]
    fn verify_matches_exactly() {
        let secret = AdminSecret::new("ADMIN_PASSWORD", "a-long-admin-secret", 12).unwrap();
        assert!(secret.verify("a-long-admin-secret"));
        assert!(!secret.verify("a-long-admin-secreT"));
        assert!(!secret.verify(""));
        assert_eq!(format!("{secret:?}"), "AdminSecret(<redacted>)");
    }

    #[test]
    fn missing_variable_is_reported_by_name() {
        let err = AdminSecret::from_env("VOXGATE_TEST_UNSET_ADMIN_SECRET", 12).unwrap_err();
        assert_eq!(err.to_string(), "environment variable VOXGATE_TEST_UNSET_ADMIN_SECRET is not set");
    }
}
