//! Provider factory pattern and per-call provider resolution.
//!
//! Each provider family registers a factory. [`ProviderRegistry::resolve`]
//! turns [`ProviderSettings`] into a ready provider:
//! 1. Look up the family's factory
//! 2. Validate the settings
//! 3. Resolve the credential (fails fast, before any client exists)
//! 4. Construct the provider
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.resolve(&ProviderSettings::new("gemini", "gemini-2.0-flash"))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::secrets::ApiCredential;
use super::{ModelProvider, ProviderError};
use crate::config::ProviderSettings;

/// Factory for creating model providers from settings.
///
/// Implement this trait to add a new provider family.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier for this provider family, e.g. "gemini", "openai".
    fn provider_type(&self) -> &'static str;

    /// Environment variable consulted when settings carry no API key.
    fn credential_env(&self) -> &'static str;

    /// Human-readable credential name for error messages.
    fn credential_name(&self) -> &'static str {
        "API key"
    }

    /// Endpoint used when settings do not override `base_url`.
    fn default_base_url(&self) -> &'static str;

    /// Create a provider with an already-resolved credential.
    fn create(
        &self,
        settings: &ProviderSettings,
        credential: ApiCredential,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError>;

    /// Validate settings without creating a provider.
    fn validate_settings(&self, settings: &ProviderSettings) -> Result<(), ProviderError> {
        if settings.model.trim().is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "{}: model is required",
                self.provider_type()
            )));
        }
        Ok(())
    }

    /// Human-readable description of this provider.
    fn description(&self) -> &'static str {
        "Model provider"
    }
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory, replacing one with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Resolve settings into a provider.
    pub fn resolve(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let factory = self.factory_for(&settings.provider)?;
        factory.validate_settings(settings)?;

        let env_var = settings
            .api_key_env
            .as_deref()
            .unwrap_or(factory.credential_env());
        let credential =
            ApiCredential::resolve(settings.api_key.as_deref(), env_var, factory.credential_name())?;

        tracing::debug!(
            provider = %settings.provider,
            model = %settings.model,
            credential_source = %credential.source(),
            "Resolved provider"
        );

        factory.create(settings, credential)
    }

    /// Validate settings for their provider family.
    pub fn validate(&self, settings: &ProviderSettings) -> Result<(), ProviderError> {
        self.factory_for(&settings.provider)?
            .validate_settings(settings)
    }

    fn factory_for(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    /// Create a registry with all built-in providers registered.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "native-schema")]
        registry.register(Arc::new(super::NativeSchemaProviderFactory));
        #[cfg(feature = "prompt-coerced")]
        registry.register(Arc::new(super::PromptCoercedProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}
