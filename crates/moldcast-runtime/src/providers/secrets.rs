//! Credential handling for model providers.
//!
//! Credentials are wrapped in [`SecretString`] the moment they are read, so
//! they cannot reach a log line through `Debug` or `Display`.
//!
//! ## Usage
//!
//! ```ignore
//! use crate::providers::secrets::ApiCredential;
//!
//! // Explicit value first, then the environment
//! let cred = ApiCredential::resolve(settings.api_key.as_deref(), "GEMINI_API_KEY", "Gemini API key")?;
//!
//! // Expose only where the header is built
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Set explicitly in provider settings
    Settings,
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Settings => write!(f, "settings"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
///
/// Debug and Display show `[REDACTED]`; the value is zeroed on drop by
/// `secrecy` and must be read through [`ApiCredential::expose`].
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Resolve a credential from an explicit value, falling back to `env_var`.
    ///
    /// Blank values count as absent, so an empty `api_key` in settings still
    /// falls through to the environment.
    pub fn resolve(
        explicit: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
            return Ok(Self::new(value, CredentialSource::Settings, name));
        }

        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(ProviderError::MissingCredential(format!(
                "{} required: set 'api_key' in provider settings or the {} environment variable",
                name, env_var
            ))),
        }
    }

    /// Expose the credential value at the point of use.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted() {
        let secret = "sk-super-secret-key-12345";
        let cred = ApiCredential::new(secret, CredentialSource::Programmatic, "Test API key");

        let debug = format!("{:?}", cred);
        assert!(!debug.contains(secret), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));

        let display = format!("{}", cred);
        assert!(!display.contains(secret), "Secret exposed in Display!");
        assert!(display.contains("Test API key from programmatic"));

        assert_eq!(cred.expose(), secret);
    }

    #[test]
    fn test_explicit_value_wins_over_environment() {
        std::env::set_var("MOLDCAST_TEST_KEY_PRIORITY", "env-key");
        let cred =
            ApiCredential::resolve(Some("settings-key"), "MOLDCAST_TEST_KEY_PRIORITY", "Test key")
                .unwrap();

        assert_eq!(cred.expose(), "settings-key");
        assert_eq!(cred.source(), CredentialSource::Settings);
        std::env::remove_var("MOLDCAST_TEST_KEY_PRIORITY");
    }

    #[test]
    fn test_blank_value_falls_back_to_environment() {
        std::env::set_var("MOLDCAST_TEST_KEY_FALLBACK", "env-key");
        let cred =
            ApiCredential::resolve(Some("  "), "MOLDCAST_TEST_KEY_FALLBACK", "Test key").unwrap();

        assert_eq!(cred.expose(), "env-key");
        assert_eq!(cred.source(), CredentialSource::Environment);
        std::env::remove_var("MOLDCAST_TEST_KEY_FALLBACK");
    }

    #[test]
    fn test_missing_credential() {
        let err = ApiCredential::resolve(Some(""), "MOLDCAST_TEST_KEY_UNSET_12345", "Test key")
            .unwrap_err();

        assert!(matches!(err, ProviderError::MissingCredential(_)));
        assert!(err.to_string().contains("MOLDCAST_TEST_KEY_UNSET_12345"));
    }
}
