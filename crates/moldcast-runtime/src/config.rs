//! Runtime configuration.
//!
//! Settings load from YAML:
//!
//! ```yaml
//! provider:
//!   provider: openai
//!   model: gpt-4o-mini
//!   api_key_env: OPENAI_API_KEY
//!   request_timeout: 45s
//! runtime:
//!   stage_timeout: 60s
//!   stage_timeouts:
//!     style-polish: 90s
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Which backend to call and how.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider family, e.g. "gemini" or "openai"
    pub provider: String,

    pub model: String,

    /// Override of the family's default endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Explicit API key; takes precedence over the environment
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable holding the key, if not the family default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    /// Ask prompt-coerced backends for JSON mode
    #[serde(default = "default_json_mode")]
    pub json_mode: bool,

    /// HTTP timeout for a single call
    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

fn default_json_mode() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

impl ProviderSettings {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: None,
            api_key: None,
            api_key_env: None,
            max_output_tokens: None,
            json_mode: default_json_mode(),
            request_timeout: default_request_timeout(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = Some(env_var.into());
        self
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_key_env", &self.api_key_env)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("json_mode", &self.json_mode)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Timeouts for the stage pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Upper bound on one stage, from request to decoded payload
    #[serde(default = "default_stage_timeout", with = "duration_str")]
    pub stage_timeout: Duration,

    /// Per-stage overrides by stage name
    #[serde(default, with = "duration_map")]
    pub stage_timeouts: BTreeMap<String, Duration>,
}

fn default_stage_timeout() -> Duration {
    Duration::from_secs(90)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stage_timeout: default_stage_timeout(),
            stage_timeouts: BTreeMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Timeout for the named stage.
    pub fn stage_timeout(&self, stage: &str) -> Duration {
        self.stage_timeouts
            .get(stage)
            .copied()
            .unwrap_or(self.stage_timeout)
    }
}

/// Complete settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Settings {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// Source of provider settings, read once per operation.
pub trait SettingsStore: Send + Sync {
    fn provider_settings(&self) -> ProviderSettings;
}

impl SettingsStore for ProviderSettings {
    fn provider_settings(&self) -> ProviderSettings {
        self.clone()
    }
}

/// Settings a host application can replace between operations.
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<ProviderSettings>>,
}

impl SharedSettings {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replace the settings. Operations already running keep their snapshot.
    pub fn replace(&self, settings: ProviderSettings) {
        *self.inner.write() = settings;
    }

    pub fn update(&self, f: impl FnOnce(&mut ProviderSettings)) {
        f(&mut *self.inner.write());
    }
}

impl SettingsStore for SharedSettings {
    fn provider_settings(&self) -> ProviderSettings {
        self.inner.read().clone()
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

mod duration_map {
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &BTreeMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (name, duration) in map {
            out.serialize_entry(name, &humantime::format_duration(*duration).to_string())?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(name, text)| {
                humantime::parse_duration(&text)
                    .map(|d| (name, d))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_yaml() {
        let yaml = r#"
provider:
  provider: openai
  model: gpt-4o-mini
  base_url: http://localhost:8080/v1
  api_key_env: MY_KEY
  request_timeout: 45s
runtime:
  stage_timeout: 1m
  stage_timeouts:
    style-polish: 2m 30s
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.provider.provider, "openai");
        assert_eq!(settings.provider.api_key_env.as_deref(), Some("MY_KEY"));
        assert_eq!(settings.provider.request_timeout, Duration::from_secs(45));
        assert!(settings.provider.json_mode);

        assert_eq!(settings.runtime.stage_timeout("scoring"), Duration::from_secs(60));
        assert_eq!(
            settings.runtime.stage_timeout("style-polish"),
            Duration::from_secs(150)
        );
    }

    #[test]
    fn test_runtime_section_is_optional() {
        let settings = Settings::from_yaml("provider: {provider: gemini, model: gemini-2.0-flash}").unwrap();
        assert_eq!(settings.runtime, RuntimeConfig::default());
        assert_eq!(settings.provider.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let yaml = "provider: {provider: gemini, model: m, request_timeout: soon}";
        assert!(matches!(Settings::from_yaml(yaml), Err(ConfigError::YamlError(_))));
    }

    #[test]
    fn test_api_key_is_redacted_and_not_serialized() {
        let settings = ProviderSettings::new("openai", "gpt-4o-mini").with_api_key("sk-secret");
        assert!(!format!("{:?}", settings).contains("sk-secret"));
        assert!(!serde_yaml::to_string(&settings).unwrap().contains("sk-secret"));
    }

    #[test]
    fn test_shared_settings_snapshot() {
        let shared = SharedSettings::new(ProviderSettings::new("gemini", "a"));
        let before = shared.provider_settings();

        shared.update(|s| s.model = "b".to_string());
        assert_eq!(before.model, "a");
        assert_eq!(shared.provider_settings().model, "b");

        shared.replace(ProviderSettings::new("openai", "c"));
        assert_eq!(shared.provider_settings().provider, "openai");
    }
}
