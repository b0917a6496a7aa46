//! # moldcast-core
//!
//! Deterministic half of the moldcast structured-generation layer.
//!
//! This crate turns unreliable model text into results a consumer can trust:
//! - Render a schema as a prompt mock for backends without native schemas
//! - Strip fences and prose around a payload
//! - Repair payloads cut off by an output-length limit
//! - Normalize merged stage results so every required field is present
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: nothing here touches the network or a model
//! 2. **Total**: sanitize, repair and normalize never fail on any input
//! 3. **Complete**: a [`PipelineResult`] always carries every required field
//!
//! ## Example
//!
//! ```rust,ignore
//! use moldcast_core::{decode_payload, normalize, Schema};
//!
//! let schema = Schema::object()
//!     .required("score", Schema::number())
//!     .required("tags", Schema::array(Schema::string()))
//!     .into_schema();
//!
//! let decoded = decode_payload("```json\n{\"score\": 8, \"tags\": [\"clear\",")?;
//! let value = normalize(&decoded.value, &schema);
//! assert_eq!(value["tags"][0], "clear");
//! ```

pub mod normalize;
pub mod operation;
pub mod payload;
pub mod schema;
pub mod synthesizer;
pub mod types;

// Re-export main types at crate root
pub use normalize::{normalize, normalize_into, normalize_with_report};
pub use operation::{OperationCatalog, OperationDefinition, OperationError, StageDefinition};
pub use payload::{decode_payload, repair, sanitize, try_repair, DecodeError, DecodedPayload};
pub use schema::{
    render, to_json_schema, validate_value, ArraySchema, Field, ObjectSchema, Primitive,
    PrimitiveKind, Schema,
};
pub use synthesizer::Synthesizer;
pub use types::{
    GenerationRequest, PipelineResult, RawModelResponse, ResponseMetadata, StageOutcome,
    StageReport, StageResult, Usage,
};

/// Decode a raw response and normalize it against `schema`.
///
/// The degraded path of a single call: a response that cannot be decoded at
/// all normalizes from an empty object, so the result is still complete.
pub fn decode_and_normalize(raw: &str, schema: &Schema) -> serde_json::Value {
    match decode_payload(raw) {
        Ok(decoded) => normalize(&decoded.value, schema),
        Err(e) => {
            tracing::debug!(error = %e, "Undecodable response, using schema defaults");
            normalize(&serde_json::Value::Object(Default::default()), schema)
        }
    }
}
