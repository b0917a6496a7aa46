//! JSON Schema export and validation for descriptors.
//!
//! Descriptors compile to draft 2020-12 JSON Schema so declared defaults and
//! cached payloads can be checked with the `jsonschema` validator.

use serde_json::{json, Map, Value};

use super::descriptor::{ObjectSchema, Schema};

/// Convert a descriptor to an equivalent JSON Schema document.
pub fn to_json_schema(schema: &Schema) -> Value {
    match schema {
        Schema::Primitive(primitive) => {
            let mut out = Map::new();
            out.insert("type".into(), Value::String(primitive.kind.as_str().into()));
            if !primitive.choices.is_empty() {
                out.insert("enum".into(), Value::Array(primitive.choices.clone()));
            }
            with_description(out, primitive.description.as_deref())
        }
        Schema::Array(array) => {
            let out = json!({
                "type": "array",
                "items": to_json_schema(&array.items),
            });
            with_description(into_map(out), array.description.as_deref())
        }
        Schema::Object(object) => object_schema(object),
        Schema::Unknown => json!({}),
    }
}

fn object_schema(object: &ObjectSchema) -> Value {
    let properties: Map<String, Value> = object
        .fields
        .iter()
        .map(|f| (f.name.clone(), to_json_schema(&f.schema)))
        .collect();

    let out = json!({
        "type": "object",
        "properties": properties,
        "required": object.required,
    });
    with_description(into_map(out), object.description.as_deref())
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn with_description(mut out: Map<String, Value>, description: Option<&str>) -> Value {
    if let Some(text) = description {
        out.insert("description".into(), Value::String(text.into()));
    }
    Value::Object(out)
}

/// Validate a value against a descriptor.
///
/// Returns `Ok(())` if valid, or every violation as `"<message> at <path>"`.
pub fn validate_value(value: &Value, schema: &Schema) -> Result<(), Vec<String>> {
    let document = to_json_schema(schema);
    let validator = jsonschema::options()
        .build(&document)
        .map_err(|e| vec![format!("Failed to compile schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
