//! Built-in operations and their typed result views.
//!
//! - `grade-essay`: three independent stages (scoring, critique, style-polish)
//! - `brainstorm`: a single ideas stage
//!
//! Both need no more than their `{{input}}` placeholders; see
//! [`OperationDefinition::required_inputs`].

use moldcast_core::{OperationCatalog, OperationDefinition, OperationError, Schema, StageDefinition};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::prompts::{
    essay_stage_prompt, BRAINSTORM_PROMPT, BRAINSTORM_USER_TEMPLATE, CRITIQUE_PROMPT,
    ESSAY_USER_TEMPLATE, SCORING_PROMPT, STYLE_POLISH_PROMPT,
};

pub const GRADE_ESSAY: &str = "grade-essay";
pub const BRAINSTORM: &str = "brainstorm";

/// Score bands, best first.
pub const SCORE_BANDS: [&str; 4] = ["excellent", "proficient", "developing", "beginning"];

fn criterion(hint: &str) -> Schema {
    Schema::number().describe(hint)
}

fn scoring_stage() -> StageDefinition {
    let criteria = Schema::object()
        .required("thesis", criterion("Clarity and strength of the central claim, 0-10"))
        .required("structure", criterion("Organization and flow, 0-10"))
        .required("evidence", criterion("Use of support and examples, 0-10"))
        .required("mechanics", criterion("Grammar, spelling and punctuation, 0-10"))
        .into_schema();

    let schema = Schema::object()
        .required("score", Schema::number().describe("Overall score, 0-10"))
        .required(
            "band",
            Schema::string_enum(SCORE_BANDS).with_default("developing"),
        )
        .required("criteria", criteria)
        .into_schema();

    StageDefinition::new(
        "scoring",
        essay_stage_prompt(SCORING_PROMPT),
        ESSAY_USER_TEMPLATE,
        schema,
    )
}

fn critique_stage() -> StageDefinition {
    let schema = Schema::object()
        .required("comment", Schema::string().describe("Two or three sentences to the student"))
        .required("strengths", Schema::array(Schema::string()))
        .required("improvements", Schema::array(Schema::string()))
        .into_schema();

    StageDefinition::new(
        "critique",
        essay_stage_prompt(CRITIQUE_PROMPT),
        ESSAY_USER_TEMPLATE,
        schema,
    )
    .with_default(json!({ "comment": "", "strengths": [], "improvements": [] }))
    .with_temperature(0.3)
}

fn style_polish_stage() -> StageDefinition {
    let edit = Schema::object()
        .required("original", Schema::string())
        .required("revised", Schema::string())
        .optional("reason", Schema::string())
        .into_schema();

    let schema = Schema::object()
        .required("polished_text", Schema::string())
        .required("edits", Schema::array(edit))
        .into_schema();

    let mut stage = StageDefinition::new(
        "style-polish",
        essay_stage_prompt(STYLE_POLISH_PROMPT),
        ESSAY_USER_TEMPLATE,
        schema,
    )
    .with_temperature(0.4);
    // Rewrites run long; give them room before the length stop.
    stage.max_output_tokens = Some(4096);
    stage
}

pub fn grade_essay() -> OperationDefinition {
    OperationDefinition::new(GRADE_ESSAY, "Score, critique and polish a student essay")
        .stage(scoring_stage())
        .stage(critique_stage())
        .stage(style_polish_stage())
}

pub fn brainstorm() -> OperationDefinition {
    let idea = Schema::object()
        .required("title", Schema::string())
        .required("description", Schema::string())
        .into_schema();
    let schema = Schema::object()
        .required("ideas", Schema::array(idea).describe("Five to ten ideas"))
        .into_schema();

    OperationDefinition::new(BRAINSTORM, "Generate ideas on a topic").stage(
        StageDefinition::new("ideas", BRAINSTORM_PROMPT.trim(), BRAINSTORM_USER_TEMPLATE, schema)
            .with_temperature(0.9),
    )
}

/// The built-in operations.
pub fn builtin_catalog() -> Result<OperationCatalog, OperationError> {
    let mut catalog = OperationCatalog::new();
    catalog.register(grade_essay())?;
    catalog.register(brainstorm())?;
    Ok(catalog)
}

/// Per-criterion scores from the scoring stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaScores {
    pub thesis: f64,
    pub structure: f64,
    pub evidence: f64,
    pub mechanics: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edit {
    pub original: String,
    pub revised: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Typed result of `grade-essay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EssayGrade {
    pub score: f64,
    pub band: String,
    pub criteria: CriteriaScores,
    pub comment: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub polished_text: String,
    pub edits: Vec<Edit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub title: String,
    pub description: String,
}

/// Typed result of `brainstorm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brainstorm {
    pub ideas: Vec<Idea>,
}
