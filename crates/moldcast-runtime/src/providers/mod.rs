//! Model provider abstractions for moldcast-runtime.
//!
//! A provider turns one [`GenerationRequest`] into one [`RawModelResponse`].
//! Two families are built in:
//! - **native-schema** backends accept the schema with the request and
//!   constrain decoding themselves (Gemini `responseSchema`)
//! - **prompt-coerced** backends are shown a rendered mock of the schema in
//!   the system prompt (OpenAI-compatible chat completions)
//!
//! ## Security
//!
//! All providers use the [`secrets`] module for credential handling.

use std::time::Duration;

use async_trait::async_trait;
use moldcast_core::{GenerationRequest, RawModelResponse};
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(any(feature = "native-schema", feature = "prompt-coerced"))]
mod transport;

#[cfg(feature = "native-schema")]
mod native;

#[cfg(feature = "prompt-coerced")]
mod prompt_coerced;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "native-schema")]
pub use native::{native_schema, NativeSchemaProvider, NativeSchemaProviderFactory};

#[cfg(feature = "prompt-coerced")]
pub use prompt_coerced::{PromptCoercedProvider, PromptCoercedProviderFactory};

/// Errors from model providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("API error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response body: {0}")]
    Decode(String),

    #[error("Backend returned no usable text")]
    EmptyResponse,

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Network or HTTP-level failure of a single call.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::Status { .. }
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Decode(_)
        )
    }

    /// Misconfiguration that prevents any call from being attempted.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::MissingCredential(_) | ProviderError::NotConfigured(_)
        )
    }
}

/// Provider abstraction allows swapping model backends.
///
/// This is the only place where network calls are made. Implementations
/// report truncation but never retry; a failed call is the caller's to
/// handle.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Execute one generation call.
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<RawModelResponse, ProviderError>;

    /// Get provider name for logs.
    fn name(&self) -> &str;

    /// Whether the backend enforces the schema itself.
    fn supports_native_schema(&self) -> bool;

    /// Check if provider is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert!(ProviderError::Transport("reset".into()).is_transport());
        assert!(ProviderError::Status {
            status: 500,
            message: "boom".into()
        }
        .is_transport());
        assert!(!ProviderError::EmptyResponse.is_transport());

        assert!(ProviderError::MissingCredential("key".into()).is_configuration());
        assert!(!ProviderError::Timeout(Duration::from_secs(1)).is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Status {
            status: 400,
            message: "bad schema".into(),
        };
        assert_eq!(err.to_string(), "API error: 400 - bad schema");
    }
}
