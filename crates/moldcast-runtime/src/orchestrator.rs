//! Stage orchestrator: concurrent fan-out over an operation's stages.
//!
//! The orchestrator implements:
//! - Parallel fan-out: every stage call is issued before any is awaited
//! - Bulkheading: a stage that errors, times out, panics or returns an
//!   unrepairable payload settles as `Failed` and never touches its siblings
//! - Deterministic fan-in through the core [`Synthesizer`]
//!
//! There is no retry here. A failed stage degrades to its default at once.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use thiserror::Error;

use moldcast_core::{
    decode_payload, DecodeError, OperationDefinition, PipelineResult, StageDefinition,
    StageResult, Synthesizer,
};

use crate::config::RuntimeConfig;
use crate::providers::{ModelProvider, ProviderError};

/// Why a single stage failed. Recorded on the stage, never returned.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Unusable payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("Stage timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stage panicked: {0}")]
    Panicked(String),
}

/// Runs the stages of one operation against one provider.
pub struct StageOrchestrator {
    provider: Arc<dyn ModelProvider>,
    config: RuntimeConfig,
    synthesizer: Synthesizer,
}

impl StageOrchestrator {
    pub fn new(provider: Arc<dyn ModelProvider>, config: RuntimeConfig) -> Self {
        Self {
            provider,
            config,
            synthesizer: Synthesizer::new(),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ModelProvider> {
        &self.provider
    }

    /// Run every stage of `operation` and merge the results.
    ///
    /// # Execution Flow
    /// 1. Fill each stage's templates from `inputs`
    /// 2. Fan-out: all stage calls run concurrently
    /// 3. Each call is sanitized, repaired if needed and decoded
    /// 4. Fan-in: the synthesizer merges, substitutes defaults and normalizes
    pub async fn run(
        &self,
        operation: &OperationDefinition,
        inputs: &BTreeMap<String, String>,
    ) -> PipelineResult {
        let started = Instant::now();

        let results = join_all(
            operation
                .stages
                .iter()
                .map(|stage| self.run_stage(stage, inputs)),
        )
        .await;

        let result = self.synthesizer.synthesize(operation, results);

        let failed = result.failed_stages().count();
        tracing::info!(
            operation = %operation.name,
            provider = %self.provider.name(),
            stages = result.stages.len(),
            failed,
            degraded = result.degraded_fields.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Operation completed"
        );

        result
    }

    /// Run one stage under its timeout, isolating panics.
    async fn run_stage(
        &self,
        stage: &StageDefinition,
        inputs: &BTreeMap<String, String>,
    ) -> StageResult {
        let started = Instant::now();
        let timeout = self.config.stage_timeout(&stage.name);
        let attempt = AssertUnwindSafe(self.attempt(stage, inputs)).catch_unwind();

        let mut result = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                tracing::warn!(stage = %stage.name, error = %e, "Stage failed, using default");
                StageResult::failed(stage.name.clone(), e.to_string())
            }
            Ok(Err(panic)) => {
                let e = StageError::Panicked(panic_message(panic.as_ref()));
                tracing::warn!(stage = %stage.name, error = %e, "Stage panicked, using default");
                StageResult::failed(stage.name.clone(), e.to_string())
            }
            Err(_) => {
                let e = StageError::Timeout(timeout);
                tracing::warn!(stage = %stage.name, timeout = ?timeout, "Stage timed out, using default");
                StageResult::failed(stage.name.clone(), e.to_string())
            }
        };

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        result
    }

    async fn attempt(
        &self,
        stage: &StageDefinition,
        inputs: &BTreeMap<String, String>,
    ) -> Result<StageResult, StageError> {
        let request = stage.build_request(inputs);
        let response = self.provider.generate(&request).await?;

        let mut result = match decode_payload(&response.text) {
            Ok(decoded) => {
                if decoded.repaired {
                    tracing::debug!(
                        stage = %stage.name,
                        truncated = response.truncated,
                        "Stage payload needed repair"
                    );
                }
                let mut result = StageResult::ok(stage.name.clone(), decoded.value);
                result.repaired = decoded.repaired;
                result
            }
            Err(e) => {
                let e = StageError::from(e);
                tracing::warn!(stage = %stage.name, error = %e, "Stage failed, using default");
                StageResult::failed(stage.name.clone(), e.to_string())
            }
        };

        result.truncated = response.truncated;
        result.usage = response.metadata.usage;
        Ok(result)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use moldcast_core::{GenerationRequest, RawModelResponse, ResponseMetadata, Schema, Usage};
    use serde_json::json;

    /// Answers by looking up the stage's user prompt.
    struct ScriptedProvider {
        replies: BTreeMap<&'static str, Reply>,
    }

    enum Reply {
        Text(&'static str),
        Truncated(&'static str),
        Fail,
        Hang,
        Panic,
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn generate(
            &self,
            request: &GenerationRequest<'_>,
        ) -> Result<RawModelResponse, ProviderError> {
            let reply = self
                .replies
                .get(request.user_prompt.as_str())
                .ok_or(ProviderError::EmptyResponse)?;
            let (text, truncated) = match reply {
                Reply::Text(text) => (*text, false),
                Reply::Truncated(text) => (*text, true),
                Reply::Fail => return Err(ProviderError::Transport("connection reset".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    ("{}", false)
                }
                Reply::Panic => panic!("adapter bug"),
            };
            Ok(RawModelResponse {
                text: text.to_string(),
                truncated,
                metadata: ResponseMetadata {
                    provider: "scripted".into(),
                    model: "scripted".into(),
                    finish_reason: None,
                    usage: Usage {
                        prompt_tokens: 10,
                        completion_tokens: 5,
                        calls: 1,
                    },
                },
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn supports_native_schema(&self) -> bool {
            false
        }
    }

    fn orchestrator(replies: Vec<(&'static str, Reply)>) -> StageOrchestrator {
        let provider = ScriptedProvider {
            replies: replies.into_iter().collect(),
        };
        let config = RuntimeConfig {
            stage_timeout: Duration::from_secs(5),
            ..RuntimeConfig::default()
        };
        StageOrchestrator::new(Arc::new(provider), config)
    }

    fn review_operation() -> OperationDefinition {
        OperationDefinition::new("review", "")
            .stage(StageDefinition::new(
                "scoring",
                "",
                "score",
                Schema::object().required("score", Schema::number()).into_schema(),
            ))
            .stage(
                StageDefinition::new(
                    "critique",
                    "",
                    "critique",
                    Schema::object().required("comment", Schema::string()).into_schema(),
                )
                .with_default(json!({ "comment": "" })),
            )
    }

    #[tokio::test]
    async fn test_failed_stage_uses_default() {
        let orchestrator = orchestrator(vec![
            ("score", Reply::Text("{\"score\": 8}")),
            ("critique", Reply::Fail),
        ]);

        let result = orchestrator.run(&review_operation(), &BTreeMap::new()).await;

        assert_eq!(json!(result.value), json!({ "score": 8, "comment": "" }));
        assert!(result.stages[0].succeeded);
        assert!(!result.stages[1].succeeded);
        assert!(result.stages[1]
            .error
            .as_deref()
            .unwrap()
            .contains("connection reset"));
        assert_eq!(result.degraded_fields, vec!["/comment".to_string()]);
    }

    #[tokio::test]
    async fn test_sibling_result_is_unaffected_by_failure() {
        let healthy = orchestrator(vec![
            ("score", Reply::Text("{\"score\": 6}")),
            ("critique", Reply::Text("{\"comment\": \"tight\"}")),
        ]);
        let broken = orchestrator(vec![
            ("score", Reply::Text("{\"score\": 6}")),
            ("critique", Reply::Panic),
        ]);

        let operation = review_operation();
        let a = healthy.run(&operation, &BTreeMap::new()).await;
        let b = broken.run(&operation, &BTreeMap::new()).await;

        assert_eq!(a.value["score"], b.value["score"]);
        assert!(a.stages[0].succeeded && b.stages[0].succeeded);
        assert_eq!(a.stages[0].usage, b.stages[0].usage);
        assert_eq!(b.value["comment"], "");
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let orchestrator = orchestrator(vec![
            ("score", Reply::Panic),
            ("critique", Reply::Text("{\"comment\": \"ok\"}")),
        ]);

        let result = orchestrator.run(&review_operation(), &BTreeMap::new()).await;

        assert_eq!(result.value["score"], 0);
        assert_eq!(result.value["comment"], "ok");
        assert!(result.stages[0]
            .error
            .as_deref()
            .unwrap()
            .contains("adapter bug"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_only_the_slow_stage() {
        let mut orchestrator = orchestrator(vec![
            ("score", Reply::Hang),
            ("critique", Reply::Text("{\"comment\": \"ok\"}")),
        ]);
        orchestrator
            .config
            .stage_timeouts
            .insert("scoring".to_string(), Duration::from_secs(2));

        let result = orchestrator.run(&review_operation(), &BTreeMap::new()).await;

        assert!(!result.stages[0].succeeded);
        assert!(result.stages[0].error.as_deref().unwrap().contains("timed out"));
        assert!(result.stages[1].succeeded);
        assert_eq!(result.value["comment"], "ok");
    }

    #[tokio::test]
    async fn test_truncated_payload_is_repaired() {
        let operation = OperationDefinition::new("lists", "").stage(StageDefinition::new(
            "items",
            "",
            "items",
            Schema::object()
                .required("a", Schema::number())
                .required("list", Schema::array(Schema::number()))
                .into_schema(),
        ));
        let orchestrator = orchestrator(vec![(
            "items",
            Reply::Truncated("```json\n{\"a\": 1, \"list\": [1, 2,"),
        )]);

        let result = orchestrator.run(&operation, &BTreeMap::new()).await;

        assert_eq!(json!(result.value), json!({ "a": 1, "list": [1, 2] }));
        assert!(result.stages[0].succeeded);
        assert!(result.stages[0].truncated);
        assert!(result.stages[0].repaired);
        assert_eq!(result.usage.calls, 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_keeps_usage() {
        let orchestrator = orchestrator(vec![
            ("score", Reply::Text("  \n")),
            ("critique", Reply::Text("{\"comment\": \"ok\"}")),
        ]);

        let result = orchestrator.run(&review_operation(), &BTreeMap::new()).await;

        assert!(!result.stages[0].succeeded);
        assert_eq!(result.stages[0].usage.calls, 1);
        assert_eq!(result.usage.calls, 2);
        assert_eq!(result.usage.total_tokens(), 30);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
