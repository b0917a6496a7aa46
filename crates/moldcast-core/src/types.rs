//! Core types for requests, responses, and pipeline results.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::Schema;

/// One backend call, fully specified.
///
/// Borrowed from its stage definition for the lifetime of a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest<'a> {
    pub system_prompt: String,
    pub user_prompt: String,

    /// Expected output shape, if the caller wants structured output
    pub schema: Option<&'a Schema>,

    pub temperature: f32,
    pub seed: Option<u64>,

    /// Per-call override of the provider's output token limit
    pub max_output_tokens: Option<u32>,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            schema: None,
            temperature: 0.0,
            seed: None,
            max_output_tokens: None,
        }
    }

    pub fn with_schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

/// Token accounting for one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.calls += other.calls;
    }
}

/// Provider-reported details about a response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub provider: String,
    pub model: String,

    /// Stop reason as reported by the backend, verbatim
    pub finish_reason: Option<String>,

    pub usage: Usage,
}

/// Unprocessed text returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawModelResponse {
    pub text: String,

    /// The backend stopped because it hit its output length limit
    pub truncated: bool,

    pub metadata: ResponseMetadata,
}

/// How a stage settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome<T = Value> {
    Ok(T),
    /// Reason the stage's default was used
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, StageOutcome::Ok(_))
    }
}

/// Result of one stage of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult<T = Value> {
    pub stage: String,
    pub outcome: StageOutcome<T>,
    pub truncated: bool,
    pub repaired: bool,
    pub elapsed_ms: u64,
    pub usage: Usage,
}

impl StageResult {
    pub fn ok(stage: impl Into<String>, value: Value) -> Self {
        Self {
            stage: stage.into(),
            outcome: StageOutcome::Ok(value),
            truncated: false,
            repaired: false,
            elapsed_ms: 0,
            usage: Usage::default(),
        }
    }

    pub fn failed(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            outcome: StageOutcome::Failed(reason.into()),
            truncated: false,
            repaired: false,
            elapsed_ms: 0,
            usage: Usage::default(),
        }
    }
}

/// Per-stage summary kept on the final result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub truncated: bool,
    pub repaired: bool,
    pub elapsed_ms: u64,

    #[serde(default)]
    pub usage: Usage,
}

/// The merged, normalized result of one operation.
///
/// `value` always carries every required field of the operation's result
/// schema, possibly as placeholders. `degraded_fields` lists the JSON
/// pointers into `value` that hold placeholders instead of model output.
/// A failed stage reports one pointer per top-level field it filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub operation: String,
    pub value: Map<String, Value>,
    pub stages: Vec<StageReport>,

    #[serde(default)]
    pub degraded_fields: Vec<String>,

    pub usage: Usage,
    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    /// Deserialize the merged value into a consumer type.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.value))
    }

    /// Whether every stage produced model output.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.succeeded)
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| !s.succeeded)
    }
}
