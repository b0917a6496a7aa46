//! Operation definitions: named tasks decomposed into independent stages.
//!
//! Operations are plain data. They can be built in code or loaded from YAML:
//!
//! ```yaml
//! operations:
//!   - name: summarize
//!     description: "One-paragraph summary"
//!     stages:
//!       - name: summary
//!         system_prompt: "You summarize documents."
//!         user_prompt: "Summarize:\n{{text}}"
//!         schema:
//!           shape: object
//!           fields:
//!             - { name: summary, shape: primitive, kind: string }
//!           required: [summary]
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::schema::{validate_value, ObjectSchema, Schema};
use crate::types::GenerationRequest;

lazy_static! {
    /// `{{ name }}` placeholders in prompt templates.
    static ref INPUT_PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_-]+)\s*\}\}").unwrap();
}

/// Errors that can occur when loading or invoking operations.
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Failed to read operations file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Operation validation failed: {0}")]
    ValidationError(String),

    #[error("Operation '{operation}' is missing inputs: {}", .missing.join(", "))]
    MissingInputs {
        operation: String,
        missing: Vec<String>,
    },
}

/// One independent generation call within an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub system_prompt: String,

    /// User prompt with `{{input}}` placeholders
    pub user_prompt: String,

    pub schema: Schema,

    /// Value contributed when the stage fails. Defaults to the schema's
    /// placeholder object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl StageDefinition {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        schema: Schema,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            schema,
            default: None,
            temperature: 0.0,
            seed: None,
            max_output_tokens: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Fill the prompt templates and produce the request for this stage.
    pub fn build_request(&self, inputs: &BTreeMap<String, String>) -> GenerationRequest<'_> {
        let mut request = GenerationRequest::new(
            fill_template(&self.system_prompt, inputs),
            fill_template(&self.user_prompt, inputs),
        )
        .with_schema(&self.schema)
        .with_temperature(self.temperature)
        .with_seed(self.seed);
        request.max_output_tokens = self.max_output_tokens;
        request
    }

    /// The value this stage contributes when it fails.
    pub fn fallback_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.schema.default_value())
    }

    /// Input names referenced by this stage's templates.
    pub fn placeholders(&self) -> BTreeSet<String> {
        [&self.system_prompt, &self.user_prompt]
            .into_iter()
            .flat_map(|template| INPUT_PLACEHOLDER.captures_iter(template))
            .map(|c| c[1].to_string())
            .collect()
    }
}

/// Replace `{{name}}` with the named input. Unknown names are left as-is.
fn fill_template(template: &str, inputs: &BTreeMap<String, String>) -> String {
    INPUT_PLACEHOLDER
        .replace_all(template, |caps: &Captures| match inputs.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// A named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub stages: Vec<StageDefinition>,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }

    /// Every input referenced by any stage.
    pub fn required_inputs(&self) -> BTreeSet<String> {
        self.stages.iter().flat_map(|s| s.placeholders()).collect()
    }

    /// Fail if a referenced input was not supplied.
    pub fn check_inputs(&self, inputs: &BTreeMap<String, String>) -> Result<(), OperationError> {
        let missing: Vec<String> = self
            .required_inputs()
            .into_iter()
            .filter(|name| !inputs.contains_key(name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OperationError::MissingInputs {
                operation: self.name.clone(),
                missing,
            })
        }
    }

    /// Schema of the merged result. Object stages contribute their fields;
    /// any other stage is nested under its own name.
    pub fn result_schema(&self) -> Schema {
        let parts: Vec<ObjectSchema> = self
            .stages
            .iter()
            .map(|stage| match &stage.schema {
                Schema::Object(object) => object.clone(),
                other => ObjectSchema::new().required(stage.name.clone(), other.clone()),
            })
            .collect();
        Schema::merge_objects(&parts).into_schema()
    }

    /// Validate structure and declared defaults.
    pub fn validate(&self) -> Result<(), OperationError> {
        if self.name.is_empty() {
            return Err(OperationError::ValidationError(
                "operation name is empty".to_string(),
            ));
        }

        if self.stages.is_empty() {
            return Err(OperationError::ValidationError(format!(
                "operation '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(&stage.name) {
                return Err(OperationError::ValidationError(format!(
                    "operation '{}' has duplicate stage '{}'",
                    self.name, stage.name
                )));
            }

            let problems = stage.schema.problems();
            if !problems.is_empty() {
                return Err(OperationError::ValidationError(format!(
                    "schema for stage '{}.{}' is invalid: {}",
                    self.name,
                    stage.name,
                    problems.join("; ")
                )));
            }

            if let Some(default) = &stage.default {
                validate_value(default, &stage.schema).map_err(|errors| {
                    OperationError::ValidationError(format!(
                        "default for stage '{}.{}' does not match its schema: {}",
                        self.name,
                        stage.name,
                        errors.join("; ")
                    ))
                })?;
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    operations: Vec<OperationDefinition>,
}

/// Registry of operations by name.
#[derive(Debug, Clone, Default)]
pub struct OperationCatalog {
    operations: BTreeMap<String, OperationDefinition>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a catalog from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, OperationError> {
        let file: CatalogFile = serde_yaml::from_str(yaml)?;
        let mut catalog = Self::new();
        for operation in file.operations {
            catalog.register(operation)?;
        }
        Ok(catalog)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, OperationError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Add an operation, replacing any existing one with the same name.
    pub fn register(&mut self, operation: OperationDefinition) -> Result<(), OperationError> {
        operation.validate()?;
        if self.operations.contains_key(&operation.name) {
            tracing::debug!(operation = %operation.name, "Replacing registered operation");
        }
        self.operations.insert(operation.name.clone(), operation);
        Ok(())
    }

    /// Merge another catalog in; its operations win on name collisions.
    pub fn extend(&mut self, other: OperationCatalog) {
        self.operations.extend(other.operations);
    }

    pub fn get(&self, name: &str) -> Option<&OperationDefinition> {
        self.operations.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationDefinition> {
        self.operations.values()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
