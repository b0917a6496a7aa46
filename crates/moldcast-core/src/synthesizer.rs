//! Synthesizer: merges stage results into one normalized result.
//!
//! Merge policy:
//! 1. A failed stage contributes its declared default
//! 2. Each stage value is normalized against its own schema
//! 3. Object values are merged key by key in stage order; a later stage
//!    overwrites an earlier one on collision
//! 4. A failed stage's default never replaces a field a successful stage set
//! 5. Non-object values are nested under the stage name
//! 6. The merged object is normalized against the operation's result schema

use std::collections::HashSet;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::normalize::{escape_pointer, normalize_with_report};
use crate::operation::OperationDefinition;
use crate::types::{PipelineResult, StageOutcome, StageReport, StageResult, Usage};

/// The Synthesizer folds settled stages into a [`PipelineResult`].
#[derive(Debug, Default)]
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    /// Merge stage results for `operation`.
    ///
    /// Stages are matched to their definitions by name. A defined stage with
    /// no result counts as failed.
    pub fn synthesize(
        &self,
        operation: &OperationDefinition,
        mut results: Vec<StageResult>,
    ) -> PipelineResult {
        let mut merged = Map::new();
        // Top-level keys currently holding a failed stage's default.
        let mut placeholders: HashSet<String> = HashSet::new();
        let mut reports = Vec::with_capacity(operation.stages.len());
        let mut degraded_fields = Vec::new();
        let mut usage = Usage::default();

        for stage in &operation.stages {
            let result = match results.iter().position(|r| r.stage == stage.name) {
                Some(index) => results.swap_remove(index),
                None => StageResult::failed(stage.name.clone(), "stage did not report a result"),
            };
            usage.add(&result.usage);

            let (value, error) = match result.outcome {
                StageOutcome::Ok(value) => (value, None),
                StageOutcome::Failed(reason) => (stage.fallback_value(), Some(reason)),
            };
            let succeeded = error.is_none();

            let (value, degraded) = normalize_with_report(&value, &stage.schema);
            if succeeded {
                degraded_fields.extend(degraded);
            }

            let entries: Vec<(String, Value)> = match value {
                Value::Object(fields) => fields.into_iter().collect(),
                other => vec![(stage.name.clone(), other)],
            };

            for (key, field_value) in entries {
                let holds_placeholder = placeholders.contains(&key);
                if succeeded {
                    if merged.contains_key(&key) && !holds_placeholder {
                        tracing::warn!(
                            operation = %operation.name,
                            stage = %stage.name,
                            field = %key,
                            "Stage overwrites a field set by an earlier stage"
                        );
                    }
                    placeholders.remove(&key);
                    merged.insert(key, field_value);
                } else if !merged.contains_key(&key) || holds_placeholder {
                    placeholders.insert(key.clone());
                    merged.insert(key, field_value);
                }
            }

            reports.push(StageReport {
                stage: stage.name.clone(),
                succeeded,
                error,
                truncated: result.truncated,
                repaired: result.repaired,
                elapsed_ms: result.elapsed_ms,
                usage: result.usage,
            });
        }

        degraded_fields.extend(
            merged
                .keys()
                .filter(|key| placeholders.contains(*key))
                .map(|key| format!("/{}", escape_pointer(key))),
        );

        let result_schema = operation.result_schema();
        let (value, degraded) = normalize_with_report(&Value::Object(merged), &result_schema);
        for path in degraded {
            if !degraded_fields.contains(&path) {
                degraded_fields.push(path);
            }
        }

        let value = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        PipelineResult {
            operation: operation.name.clone(),
            value,
            stages: reports,
            degraded_fields,
            usage,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::StageDefinition;
    use crate::schema::Schema;
    use serde_json::json;

    fn two_stage() -> OperationDefinition {
        OperationDefinition::new("grade", "")
            .stage(StageDefinition::new(
                "scoring",
                "",
                "{{text}}",
                Schema::object().required("score", Schema::number()).into_schema(),
            ))
            .stage(
                StageDefinition::new(
                    "critique",
                    "",
                    "{{text}}",
                    Schema::object().required("comment", Schema::string()).into_schema(),
                )
                .with_default(json!({"comment": ""})),
            )
    }

    #[test]
    fn test_failed_stage_contributes_default() {
        let result = Synthesizer::new().synthesize(
            &two_stage(),
            vec![
                StageResult::ok("scoring", json!({"score": 8})),
                StageResult::failed("critique", "transport error"),
            ],
        );

        assert_eq!(Value::Object(result.value), json!({"score": 8, "comment": ""}));
        assert!(result.stages[0].succeeded);
        assert!(!result.stages[1].succeeded);
        assert_eq!(result.stages[1].error.as_deref(), Some("transport error"));
        assert_eq!(result.degraded_fields, vec!["/comment"]);
    }

    #[test]
    fn test_missing_stage_result_counts_as_failed() {
        let result = Synthesizer::new().synthesize(
            &two_stage(),
            vec![StageResult::ok("critique", json!({"comment": "Good"}))],
        );
        assert_eq!(result.value["score"], 0);
        assert_eq!(result.value["comment"], "Good");
        assert!(!result.is_complete());
    }

    #[test]
    fn test_partial_stage_value_is_filled() {
        let result = Synthesizer::new().synthesize(
            &two_stage(),
            vec![
                StageResult::ok("scoring", json!({})),
                StageResult::ok("critique", json!({"comment": "Fine"})),
            ],
        );
        assert_eq!(result.value["score"], 0);
        assert!(result.is_complete());
        assert_eq!(result.degraded_fields, vec!["/score"]);
    }

    #[test]
    fn test_later_stage_wins_on_collision() {
        let op = OperationDefinition::new("merge", "")
            .stage(StageDefinition::new(
                "first",
                "",
                "",
                Schema::object().required("note", Schema::string()).into_schema(),
            ))
            .stage(StageDefinition::new(
                "second",
                "",
                "",
                Schema::object().required("note", Schema::string()).into_schema(),
            ));
        let result = Synthesizer::new().synthesize(
            &op,
            vec![
                StageResult::ok("second", json!({"note": "later"})),
                StageResult::ok("first", json!({"note": "earlier"})),
            ],
        );
        assert_eq!(result.value["note"], "later");
    }

    fn shared_note() -> OperationDefinition {
        let note = || Schema::object().required("note", Schema::string()).into_schema();
        OperationDefinition::new("merge", "")
            .stage(StageDefinition::new("first", "", "", note()))
            .stage(StageDefinition::new("second", "", "", note()).with_default(json!({"note": "n/a"})))
    }

    #[test]
    fn test_failed_stage_default_never_replaces_sibling_output() {
        let result = Synthesizer::new().synthesize(
            &shared_note(),
            vec![
                StageResult::ok("first", json!({"note": "real model output"})),
                StageResult::failed("second", "timed out"),
            ],
        );
        assert_eq!(result.value["note"], "real model output");
        assert!(result.degraded_fields.is_empty());

        let result = Synthesizer::new().synthesize(
            &shared_note(),
            vec![
                StageResult::failed("first", "timed out"),
                StageResult::ok("second", json!({"note": "later output"})),
            ],
        );
        assert_eq!(result.value["note"], "later output");
        assert!(result.degraded_fields.is_empty());
    }

    #[test]
    fn test_all_failed_stages_report_field_pointers() {
        let result = Synthesizer::new().synthesize(
            &shared_note(),
            vec![
                StageResult::failed("first", "reset"),
                StageResult::failed("second", "reset"),
            ],
        );
        assert_eq!(result.value["note"], "n/a");
        assert_eq!(result.degraded_fields, vec!["/note"]);
    }

    #[test]
    fn test_non_object_stage_nests_under_name() {
        let op = OperationDefinition::new("tags", "").stage(StageDefinition::new(
            "labels",
            "",
            "",
            Schema::array(Schema::string()),
        ));
        let result = Synthesizer::new()
            .synthesize(&op, vec![StageResult::ok("labels", json!(["a", 1, "b"]))]);
        assert_eq!(result.value["labels"], json!(["a", "b"]));
    }
}
