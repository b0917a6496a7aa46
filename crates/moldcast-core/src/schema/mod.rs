//! Schema descriptors and their renderings.
//!
//! A [`Schema`] is pure data. It is rendered to a prompt mock for
//! prompt-coerced backends, exported to JSON Schema for validation, and
//! walked by the normalizer to fill in missing fields.

mod descriptor;
mod json_schema;
mod render;

pub use descriptor::{ArraySchema, Field, ObjectSchema, Primitive, PrimitiveKind, Schema};
pub use json_schema::{to_json_schema, validate_value};
pub use render::{render, MAX_RENDER_DEPTH, PLACEHOLDER};
