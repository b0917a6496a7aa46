//! Prompt text for the built-in operations and the schema instruction
//! appended for prompt-coerced backends.
//!
//! Prompt wording is configuration: custom operations loaded from YAML
//! bring their own. These are the defaults for the built-in catalog.
//! User prompt templates use `{{input}}` placeholders.

use moldcast_core::{render, Schema};

/// Appended to the system prompt when the backend has no schema mode.
pub const SCHEMA_INSTRUCTION: &str = "Respond with only a JSON value shaped like the structure below. \
Do not wrap it in a code block and do not add any text before or after it. \
Use exactly one of the listed choices where a field offers choices.";

/// System prompt plus rendered schema for a prompt-coerced call.
pub fn coerced_system_prompt(system_prompt: &str, schema: &Schema) -> String {
    let base = system_prompt.trim_end();
    let sep = if base.is_empty() { "" } else { "\n\n" };
    format!("{}{}{}\n\n{}", base, sep, SCHEMA_INSTRUCTION, render(schema))
}

/// Shared framing for the grade-essay stages.
pub const ESSAY_REVIEWER_PROMPT: &str = r#"
You are an experienced writing instructor reviewing a student essay.
Base every judgement on the essay text you are given.
Do not invent quotations and do not comment on anything outside the essay.
"#;

pub const SCORING_PROMPT: &str = r#"
## Task: Scoring

Score the essay from 0 to 10 against the assignment prompt.
Give each criterion (thesis, structure, evidence, mechanics) its own score
from 0 to 10 and place the overall result in one band.
"#;

pub const CRITIQUE_PROMPT: &str = r#"
## Task: Critique

Write a short overall comment addressed to the student, then list the
essay's main strengths and the most useful improvements, most important first.
"#;

pub const STYLE_POLISH_PROMPT: &str = r#"
## Task: Style Polish

Rewrite the essay with clearer sentences and consistent tone.
Keep the author's argument, structure and voice.
List each substantive edit with the original and revised wording.
"#;

pub const ESSAY_USER_TEMPLATE: &str = "Assignment prompt:\n{{prompt}}\n\nEssay:\n{{essay}}";

pub const BRAINSTORM_PROMPT: &str = r#"
You are a creative partner helping someone explore a topic.
Offer varied, concrete ideas. Avoid near-duplicates.
"#;

pub const BRAINSTORM_USER_TEMPLATE: &str = "Topic:\n{{topic}}\n\nSuggest ideas worth exploring.";

/// Join the shared essay framing with a stage's task.
pub fn essay_stage_prompt(task: &str) -> String {
    format!("{}\n{}", ESSAY_REVIEWER_PROMPT.trim(), task.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerced_prompt_carries_instruction_and_mock() {
        let schema = Schema::object()
            .required("band", Schema::string_enum(["low", "high"]))
            .into_schema();
        let prompt = coerced_system_prompt("You grade essays.\n", &schema);

        assert!(prompt.starts_with("You grade essays.\n\nRespond with only"));
        assert!(prompt.contains("\"band\""));
        assert!(prompt.contains("low"));
        assert!(prompt.contains("high"));
    }

    #[test]
    fn test_coerced_prompt_without_system_text() {
        let prompt = coerced_system_prompt("  ", &Schema::string());
        assert!(prompt.starts_with(SCHEMA_INSTRUCTION));
    }

    #[test]
    fn test_essay_stage_prompts_share_framing() {
        for task in [SCORING_PROMPT, CRITIQUE_PROMPT, STYLE_POLISH_PROMPT] {
            let prompt = essay_stage_prompt(task);
            assert!(prompt.starts_with("You are an experienced writing instructor"));
            assert!(prompt.contains("## Task:"));
        }
    }

    #[test]
    fn test_templates_name_their_inputs() {
        assert!(ESSAY_USER_TEMPLATE.contains("{{essay}}"));
        assert!(ESSAY_USER_TEMPLATE.contains("{{prompt}}"));
        assert!(BRAINSTORM_USER_TEMPLATE.contains("{{topic}}"));
    }
}
