//! # moldcast-runtime
//!
//! Async half of moldcast: provider adapters, stage fan-out and the
//! `run_operation` entry point.
//!
//! ## Architecture
//!
//! ```text
//! run_operation(name, inputs)
//!   -> catalog lookup, input check
//!   -> ProviderRegistry::resolve(settings)     (fails fast on a missing key)
//!   -> StageOrchestrator: all stages in parallel, each bulkheaded
//!        generate -> sanitize -> repair -> parse
//!   -> Synthesizer: merge, defaults, normalize  (moldcast-core)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use moldcast_runtime::{Engine, ProviderSettings};
//!
//! let engine = Engine::builder()
//!     .settings(ProviderSettings::new("gemini", "gemini-2.0-flash"))
//!     .build()?;
//!
//! let grade = engine.grade_essay(&essay, "Argue for or against tidal power.").await?;
//! println!("{} ({})", grade.score, grade.band);
//! ```

use thiserror::Error;

pub mod config;
pub mod engine;
pub mod operations;
pub mod orchestrator;
pub mod prompts;
pub mod providers;

pub use config::{ConfigError, ProviderSettings, RuntimeConfig, Settings, SettingsStore, SharedSettings};
pub use engine::{Engine, EngineBuilder};
pub use operations::{builtin_catalog, Brainstorm, EssayGrade};
pub use orchestrator::{StageError, StageOrchestrator};
pub use providers::{ModelProvider, ProviderError, ProviderFactory, ProviderRegistry};

/// Errors returned to callers of [`Engine::run_operation`].
///
/// Everything here happens before any stage is attempted. Stage-level
/// failures are recorded on the result instead.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error(transparent)]
    Operation(#[from] moldcast_core::OperationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Result does not fit the requested type: {0}")]
    Typed(#[from] serde_json::Error),
}
