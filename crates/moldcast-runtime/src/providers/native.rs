//! Native-schema adapter: Gemini `generateContent` with `responseSchema`.
//!
//! The backend constrains decoding itself, so the system prompt is sent as
//! written. The sanitizer still runs downstream on whatever comes back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moldcast_core::{
    GenerationRequest, ObjectSchema, Primitive, PrimitiveKind, RawModelResponse,
    ResponseMetadata, Schema, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::factory::ProviderFactory;
use super::secrets::ApiCredential;
use super::transport;
use super::{ModelProvider, ProviderError};
use crate::config::ProviderSettings;

/// Environment variable name for the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Stop reason Gemini reports when the output limit was hit.
const MAX_TOKENS_REASON: &str = "MAX_TOKENS";

/// Gemini provider with constrained JSON decoding.
pub struct NativeSchemaProvider {
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_output_tokens: Option<u32>,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for NativeSchemaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSchemaProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl NativeSchemaProvider {
    pub fn new(settings: &ProviderSettings, credential: ApiCredential) -> Result<Self, ProviderError> {
        Ok(Self {
            credential,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
            model: settings.model.clone(),
            max_output_tokens: settings.max_output_tokens,
            timeout: settings.request_timeout,
            client: transport::build_client(settings.request_timeout)?,
        })
    }

    fn model_url(&self) -> String {
        transport::endpoint(&self.base_url, &format!("models/{}", self.model))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

fn text_content(text: &str, role: Option<&str>) -> GeminiContent {
    GeminiContent {
        role: role.map(str::to_string),
        parts: vec![GeminiPart {
            text: Some(text.to_string()),
        }],
    }
}

/// Translate a descriptor into Gemini's OpenAPI-subset schema.
///
/// Returns `None` for shapes Gemini cannot express; such object fields are
/// left out of `properties` and the normalizer fills them afterwards.
pub fn native_schema(schema: &Schema) -> Option<Value> {
    let mut out = match schema {
        Schema::Primitive(p) => primitive_schema(p),
        Schema::Array(a) => {
            let items = native_schema(&a.items)?;
            json!({ "type": "ARRAY", "items": items })
        }
        Schema::Object(o) => object_schema(o),
        Schema::Unknown => return None,
    };
    if let (Some(text), Value::Object(map)) = (schema.description(), &mut out) {
        map.insert("description".to_string(), Value::String(text.to_string()));
    }
    Some(out)
}

fn primitive_schema(p: &Primitive) -> Value {
    let kind = match p.kind {
        PrimitiveKind::String => "STRING",
        PrimitiveKind::Number => "NUMBER",
        PrimitiveKind::Boolean => "BOOLEAN",
    };
    let mut out = json!({ "type": kind });
    if p.kind == PrimitiveKind::String && !p.choices.is_empty() {
        out["format"] = json!("enum");
        out["enum"] = Value::Array(p.choices.clone());
    }
    out
}

fn object_schema(o: &ObjectSchema) -> Value {
    let mut properties = Map::new();
    let mut ordering = Vec::new();
    for field in &o.fields {
        if let Some(schema) = native_schema(&field.schema) {
            properties.insert(field.name.clone(), schema);
            ordering.push(Value::String(field.name.clone()));
        }
    }
    let required: Vec<Value> = o
        .required
        .iter()
        .filter(|name| properties.contains_key(name.as_str()))
        .map(|name| Value::String(name.clone()))
        .collect();

    let mut out = json!({ "type": "OBJECT", "properties": properties });
    if !required.is_empty() {
        out["required"] = Value::Array(required);
    }
    if !ordering.is_empty() {
        out["propertyOrdering"] = Value::Array(ordering);
    }
    out
}

#[async_trait]
impl ModelProvider for NativeSchemaProvider {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<RawModelResponse, ProviderError> {
        let response_schema = request.schema.and_then(native_schema);
        let body = GeminiRequest {
            system_instruction: (!request.system_prompt.trim().is_empty())
                .then(|| text_content(&request.system_prompt, None)),
            contents: vec![text_content(&request.user_prompt, Some("user"))],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                seed: request.seed,
                max_output_tokens: request.max_output_tokens.or(self.max_output_tokens),
                response_mime_type: request.schema.map(|_| "application/json"),
                response_schema,
            },
        };

        let url = format!("{}:generateContent", self.model_url());
        let reply: GeminiResponse =
            transport::post_json(&self.client, &url, &self.credential, &body, self.timeout).await?;

        let usage = reply
            .usage_metadata
            .map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                calls: 1,
            })
            .unwrap_or(Usage {
                calls: 1,
                ..Usage::default()
            });

        let candidate = reply
            .candidates
            .into_iter()
            .next()
            .ok_or(ProviderError::EmptyResponse)?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        let truncated = candidate.finish_reason.as_deref() == Some(MAX_TOKENS_REASON);
        if truncated {
            tracing::debug!(model = %self.model, "Gemini stopped at the output token limit");
        }

        Ok(RawModelResponse {
            text,
            truncated,
            metadata: ResponseMetadata {
                provider: "gemini".to_string(),
                model: reply.model_version.unwrap_or_else(|| self.model.clone()),
                finish_reason: candidate.finish_reason,
                usage,
            },
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn supports_native_schema(&self) -> bool {
        true
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.model_url())
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

/// Factory for Gemini providers.
pub struct NativeSchemaProviderFactory;

impl ProviderFactory for NativeSchemaProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn credential_env(&self) -> &'static str {
        GEMINI_API_KEY_ENV
    }

    fn credential_name(&self) -> &'static str {
        "Gemini API key"
    }

    fn default_base_url(&self) -> &'static str {
        GEMINI_BASE_URL
    }

    fn create(
        &self,
        settings: &ProviderSettings,
        credential: ApiCredential,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        Ok(Arc::new(NativeSchemaProvider::new(settings, credential)?))
    }

    fn description(&self) -> &'static str {
        "Gemini with native response schemas"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CredentialSource;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn verdict_schema() -> Schema {
        Schema::object()
            .required("score", Schema::number().describe("0 to 10"))
            .required("band", Schema::string_enum(["low", "high"]))
            .optional("notes", Schema::array(Schema::string()))
            .into_schema()
    }

    fn provider_for(server: &MockServer) -> NativeSchemaProvider {
        let settings = ProviderSettings::new("gemini", "gemini-2.0-flash").with_base_url(server.uri());
        let credential = ApiCredential::new("test-key", CredentialSource::Programmatic, "Gemini API key");
        NativeSchemaProvider::new(&settings, credential).unwrap()
    }

    fn reply(text: &str, finish_reason: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": text }] },
                "finishReason": finish_reason
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 7 },
            "modelVersion": "gemini-2.0-flash-001"
        })
    }

    #[test]
    fn test_native_schema_translation() {
        let native = native_schema(&verdict_schema()).unwrap();
        assert_eq!(native["type"], "OBJECT");
        assert_eq!(native["properties"]["score"]["type"], "NUMBER");
        assert_eq!(native["properties"]["score"]["description"], "0 to 10");
        assert_eq!(native["properties"]["band"]["enum"], json!(["low", "high"]));
        assert_eq!(native["properties"]["notes"]["items"]["type"], "STRING");
        assert_eq!(native["required"], json!(["score", "band"]));
        assert_eq!(native["propertyOrdering"], json!(["score", "band", "notes"]));
    }

    #[test]
    fn test_unknown_shapes_are_omitted() {
        let schema = Schema::object()
            .required("known", Schema::boolean())
            .required("mystery", Schema::Unknown)
            .optional("list", Schema::array(Schema::Unknown))
            .into_schema();
        let native = native_schema(&schema).unwrap();
        assert_eq!(native["properties"].as_object().unwrap().len(), 1);
        assert_eq!(native["required"], json!(["known"]));
        assert!(native_schema(&Schema::Unknown).is_none());
    }

    #[tokio::test]
    async fn test_generate_sends_schema_and_reads_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "systemInstruction": { "parts": [{ "text": "You grade essays." }] },
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "responseSchema": { "type": "OBJECT" },
                    "seed": 7
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("{\"score\": 8}", "STOP")))
            .expect(1)
            .mount(&server)
            .await;

        let schema = verdict_schema();
        let request = GenerationRequest::new("You grade essays.", "Essay text")
            .with_schema(&schema)
            .with_seed(Some(7));
        let response = provider_for(&server).generate(&request).await.unwrap();

        assert_eq!(response.text, "{\"score\": 8}");
        assert!(!response.truncated);
        assert_eq!(response.metadata.model, "gemini-2.0-flash-001");
        assert_eq!(response.metadata.usage.prompt_tokens, 12);
        assert_eq!(response.metadata.usage.completion_tokens, 7);
    }

    #[tokio::test]
    async fn test_max_tokens_sets_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(reply("{\"score\": 8, \"band\": \"hi", "MAX_TOKENS")),
            )
            .mount(&server)
            .await;

        let response = provider_for(&server)
            .generate(&GenerationRequest::new("", "go"))
            .await
            .unwrap();
        assert!(response.truncated);
        assert_eq!(response.metadata.finish_reason.as_deref(), Some("MAX_TOKENS"));
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .generate(&GenerationRequest::new("", "go"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_error_status_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 400, "message": "Invalid schema", "status": "INVALID_ARGUMENT" }
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .generate(&GenerationRequest::new("", "go"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        match err {
            ProviderError::Status { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid schema");
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let settings = ProviderSettings::new("gemini", "m");
        let credential = ApiCredential::new("AIza-secret", CredentialSource::Settings, "Gemini API key");
        let provider = NativeSchemaProvider::new(&settings, credential).unwrap();
        assert!(!format!("{:?}", provider).contains("AIza-secret"));
    }
}
