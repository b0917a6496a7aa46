//! The caller-facing entry point: `run_operation(name, inputs)`.
//!
//! Per call the engine:
//! 1. Looks up the operation and checks its inputs
//! 2. Reads provider settings once from the [`SettingsStore`]
//! 3. Resolves the provider (credential checked before any network call)
//! 4. Hands the stages to the [`StageOrchestrator`]
//!
//! Only steps 1-3 can fail. Once stages run, failures degrade instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use moldcast_core::{OperationCatalog, PipelineResult};

use crate::config::{RuntimeConfig, Settings, SettingsStore};
use crate::operations::{builtin_catalog, Brainstorm, EssayGrade, BRAINSTORM, GRADE_ESSAY};
use crate::orchestrator::StageOrchestrator;
use crate::providers::{ModelProvider, ProviderError, ProviderRegistry};
use crate::RuntimeError;

/// Runs named operations against the configured provider.
pub struct Engine {
    catalog: OperationCatalog,
    registry: ProviderRegistry,
    settings: Option<Arc<dyn SettingsStore>>,
    provider: Option<Arc<dyn ModelProvider>>,
    config: RuntimeConfig,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Engine over the built-in catalog and providers, configured by a
    /// settings file.
    pub fn from_settings(settings: Settings) -> Result<Self, RuntimeError> {
        EngineBuilder::new()
            .settings(settings.provider)
            .config(settings.runtime)
            .build()
    }

    pub fn catalog(&self) -> &OperationCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run a named operation.
    ///
    /// Errors only when no stage could be attempted: unknown operation,
    /// missing inputs, or a provider that cannot be configured.
    pub async fn run_operation(
        &self,
        name: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<PipelineResult, RuntimeError> {
        let operation = self
            .catalog
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownOperation(name.to_string()))?;
        operation.check_inputs(inputs)?;

        let provider = self.resolve_provider()?;
        let orchestrator = StageOrchestrator::new(provider, self.config.clone());
        Ok(orchestrator.run(operation, inputs).await)
    }

    /// Run an operation and deserialize its merged value.
    pub async fn run_typed<T: DeserializeOwned>(
        &self,
        name: &str,
        inputs: &BTreeMap<String, String>,
    ) -> Result<T, RuntimeError> {
        Ok(self.run_operation(name, inputs).await?.into_typed()?)
    }

    pub async fn grade_essay(&self, essay: &str, prompt: &str) -> Result<EssayGrade, RuntimeError> {
        let inputs = BTreeMap::from([
            ("essay".to_string(), essay.to_string()),
            ("prompt".to_string(), prompt.to_string()),
        ]);
        self.run_typed(GRADE_ESSAY, &inputs).await
    }

    pub async fn brainstorm(&self, topic: &str) -> Result<Brainstorm, RuntimeError> {
        let inputs = BTreeMap::from([("topic".to_string(), topic.to_string())]);
        self.run_typed(BRAINSTORM, &inputs).await
    }

    /// Resolve the configured provider and check that its endpoint answers.
    ///
    /// Returns the provider name and whether it answered.
    pub async fn check_provider(&self) -> Result<(String, bool), RuntimeError> {
        let provider = self.resolve_provider()?;
        let healthy = provider.health_check().await;
        tracing::info!(provider = %provider.name(), healthy, "Provider health check");
        Ok((provider.name().to_string(), healthy))
    }

    fn resolve_provider(&self) -> Result<Arc<dyn ModelProvider>, RuntimeError> {
        if let Some(provider) = &self.provider {
            return Ok(provider.clone());
        }
        let store = self.settings.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured("no provider settings configured".to_string())
        })?;
        Ok(self.registry.resolve(&store.provider_settings())?)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("operations", &self.catalog.names().collect::<Vec<_>>())
            .field("registry", &self.registry)
            .field("fixed_provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    operations: Option<OperationCatalog>,
    builtins: bool,
    registry: Option<ProviderRegistry>,
    settings: Option<Arc<dyn SettingsStore>>,
    provider: Option<Arc<dyn ModelProvider>>,
    config: RuntimeConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            operations: None,
            builtins: true,
            registry: None,
            settings: None,
            provider: None,
            config: RuntimeConfig::default(),
        }
    }

    /// Provider settings, read once per operation.
    pub fn settings(self, settings: impl SettingsStore + 'static) -> Self {
        self.shared_settings(Arc::new(settings))
    }

    pub fn shared_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Use this provider for every call instead of resolving from settings.
    pub fn provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Additional operations; they replace built-ins with the same name.
    pub fn operations(mut self, catalog: OperationCatalog) -> Self {
        match &mut self.operations {
            Some(existing) => existing.extend(catalog),
            None => self.operations = Some(catalog),
        }
        self
    }

    /// Leave the built-in operations out of the catalog.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Engine, RuntimeError> {
        if self.settings.is_none() && self.provider.is_none() {
            return Err(ProviderError::NotConfigured(
                "set provider settings or a provider".to_string(),
            )
            .into());
        }

        let mut catalog = if self.builtins {
            builtin_catalog()?
        } else {
            OperationCatalog::new()
        };
        if let Some(extra) = self.operations {
            catalog.extend(extra);
        }

        Ok(Engine {
            catalog,
            registry: self.registry.unwrap_or_else(ProviderRegistry::with_defaults),
            settings: self.settings,
            provider: self.provider,
            config: self.config,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
