//! Prompt-coerced adapter: OpenAI-compatible `/chat/completions`.
//!
//! The backend has no way to take a schema, so the rendered mock and a
//! "structure only" instruction are appended to the system prompt and JSON
//! mode is requested when the settings allow it. Works against any server
//! speaking the same protocol (vLLM, Ollama, LM Studio) via `base_url`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moldcast_core::{GenerationRequest, RawModelResponse, ResponseMetadata, Usage};
use serde::{Deserialize, Serialize};

use super::factory::ProviderFactory;
use super::secrets::ApiCredential;
use super::transport;
use super::{ModelProvider, ProviderError};
use crate::config::ProviderSettings;
use crate::prompts::coerced_system_prompt;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Stop reason reported when the completion hit `max_tokens`.
const LENGTH_REASON: &str = "length";

/// OpenAI-compatible chat completion provider.
pub struct PromptCoercedProvider {
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_output_tokens: Option<u32>,
    json_mode: bool,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for PromptCoercedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptCoercedProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("json_mode", &self.json_mode)
            .finish()
    }
}

impl PromptCoercedProvider {
    pub fn new(settings: &ProviderSettings, credential: ApiCredential) -> Result<Self, ProviderError> {
        Ok(Self {
            credential,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            model: settings.model.clone(),
            max_output_tokens: settings.max_output_tokens,
            json_mode: settings.json_mode,
            timeout: settings.request_timeout,
            client: transport::build_client(settings.request_timeout)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl PromptCoercedProvider {
    fn build_body(&self, request: &GenerationRequest<'_>) -> ChatRequest {
        let system = match request.schema {
            Some(schema) => coerced_system_prompt(&request.system_prompt, schema),
            None => request.system_prompt.clone(),
        };

        let mut messages = Vec::with_capacity(2);
        if !system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: request.user_prompt.clone(),
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            seed: request.seed,
            max_tokens: request.max_output_tokens.or(self.max_output_tokens),
            response_format: (self.json_mode && request.schema.is_some()).then_some(
                ResponseFormat {
                    type_: "json_object",
                },
            ),
        }
    }
}

#[async_trait]
impl ModelProvider for PromptCoercedProvider {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<RawModelResponse, ProviderError> {
        let body = self.build_body(request);
        let url = transport::endpoint(&self.base_url, "chat/completions");
        let reply: ChatResponse =
            transport::post_json(&self.client, &url, &self.credential, &body, self.timeout).await?;

        let usage = Usage {
            prompt_tokens: reply.usage.as_ref().map_or(0, |u| u.prompt_tokens),
            completion_tokens: reply.usage.as_ref().map_or(0, |u| u.completion_tokens),
            calls: 1,
        };

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        let text = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)?;

        let truncated = choice.finish_reason.as_deref() == Some(LENGTH_REASON);
        if truncated {
            tracing::debug!(model = %self.model, "Completion stopped at max_tokens");
        }

        Ok(RawModelResponse {
            text,
            truncated,
            metadata: ResponseMetadata {
                provider: "openai".to_string(),
                model: reply.model.unwrap_or_else(|| self.model.clone()),
                finish_reason: choice.finish_reason,
                usage,
            },
        })
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn supports_native_schema(&self) -> bool {
        false
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(transport::endpoint(&self.base_url, "models"))
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Factory for OpenAI-compatible providers.
pub struct PromptCoercedProviderFactory;

impl ProviderFactory for PromptCoercedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn credential_env(&self) -> &'static str {
        OPENAI_API_KEY_ENV
    }

    fn credential_name(&self) -> &'static str {
        "OpenAI API key"
    }

    fn default_base_url(&self) -> &'static str {
        OPENAI_BASE_URL
    }

    fn create(
        &self,
        settings: &ProviderSettings,
        credential: ApiCredential,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        Ok(Arc::new(PromptCoercedProvider::new(settings, credential)?))
    }

    fn validate_settings(&self, settings: &ProviderSettings) -> Result<(), ProviderError> {
        if settings.model.trim().is_empty() {
            return Err(ProviderError::NotConfigured(
                "openai: model is required".to_string(),
            ));
        }
        if let Some(url) = &settings.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions with a rendered schema"
    }
}
