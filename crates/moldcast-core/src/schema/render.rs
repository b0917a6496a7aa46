//! Schema-to-prompt rendering.
//!
//! Backends without constrained decoding are shown a mock of the expected
//! structure instead. The mock reads like JSON with type names in place of
//! values and `//` comments carrying field hints:
//!
//! ```text
//! {
//!   "score": number, // Overall score
//!   "band": "high" | "low",
//!   "tags": [
//!     string
//!   ]
//! }
//! ```
//!
//! Enumerations are always spelled out as literal choices; models follow an
//! explicit closed list far more reliably than a generic placeholder.

use std::fmt::Write;

use super::descriptor::{Field, ObjectSchema, Primitive, Schema};

/// Nesting depth beyond which sub-schemas collapse to [`PLACEHOLDER`].
pub const MAX_RENDER_DEPTH: usize = 16;

/// Token rendered for unknown shapes and for anything past the depth limit.
pub const PLACEHOLDER: &str = "\"...\"";

const INDENT: &str = "  ";

/// Render a schema as an imitable text mock. Never fails.
pub fn render(schema: &Schema) -> String {
    let mut out = String::new();
    render_into(schema, 0, &mut out);
    out
}

fn render_into(schema: &Schema, depth: usize, out: &mut String) {
    if depth > MAX_RENDER_DEPTH {
        out.push_str(PLACEHOLDER);
        return;
    }

    match schema {
        Schema::Primitive(primitive) => out.push_str(&primitive_token(primitive)),
        Schema::Array(array) => {
            out.push_str("[\n");
            push_indent(depth + 1, out);
            render_into(&array.items, depth + 1, out);
            out.push('\n');
            push_indent(depth, out);
            out.push(']');
        }
        Schema::Object(object) if object.fields.is_empty() => out.push_str("{}"),
        Schema::Object(object) => render_object(object, depth, out),
        Schema::Unknown => out.push_str(PLACEHOLDER),
    }
}

fn render_object(object: &ObjectSchema, depth: usize, out: &mut String) {
    out.push_str("{\n");
    let last = object.fields.len().saturating_sub(1);

    for (index, field) in object.fields.iter().enumerate() {
        push_indent(depth + 1, out);
        out.push_str(&quote(&field.name));
        out.push_str(": ");
        render_into(&field.schema, depth + 1, out);
        if index != last {
            out.push(',');
        }
        if let Some(comment) = field_comment(object, field) {
            let _ = write!(out, " // {}", comment);
        }
        out.push('\n');
    }

    push_indent(depth, out);
    out.push('}');
}

fn primitive_token(primitive: &Primitive) -> String {
    if primitive.choices.is_empty() {
        return primitive.kind.as_str().to_string();
    }

    primitive
        .choices
        .iter()
        .map(|choice| serde_json::to_string(choice).unwrap_or_else(|_| PLACEHOLDER.to_string()))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn field_comment(object: &ObjectSchema, field: &Field) -> Option<String> {
    let optional = !object.is_required(&field.name);
    match (field.schema.description(), optional) {
        (Some(text), true) => Some(format!("(optional) {}", single_line(text))),
        (Some(text), false) => Some(single_line(text)),
        (None, true) => Some("(optional)".to_string()),
        (None, false) => None,
    }
}

/// Descriptions are embedded in `//` comments, so they must stay on one line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn quote(name: &str) -> String {
    serde_json::to_string(name).unwrap_or_else(|_| format!("\"{}\"", name))
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}
