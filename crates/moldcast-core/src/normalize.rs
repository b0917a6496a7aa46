//! Result normalization.
//!
//! Walks a value against its schema and substitutes a type-appropriate
//! placeholder wherever a required field is absent, has the wrong primitive
//! kind, or falls outside a declared enumeration. The output always carries
//! every required field, even when the model produced nothing usable.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::schema::{ArraySchema, ObjectSchema, Primitive, Schema};

/// Normalize `value` against `schema`.
pub fn normalize(value: &Value, schema: &Schema) -> Value {
    normalize_with_report(value, schema).0
}

/// Normalize and report the JSON pointer of every field that was replaced
/// by a placeholder.
pub fn normalize_with_report(value: &Value, schema: &Schema) -> (Value, Vec<String>) {
    let mut walker = Walker::default();
    let normalized = walker.visit(Some(value), schema, "");
    (normalized, walker.degraded)
}

/// Normalize and deserialize into a consumer type.
pub fn normalize_into<T: DeserializeOwned>(value: &Value, schema: &Schema) -> Result<T, serde_json::Error> {
    serde_json::from_value(normalize(value, schema))
}

#[derive(Default)]
struct Walker {
    degraded: Vec<String>,
}

impl Walker {
    fn visit(&mut self, value: Option<&Value>, schema: &Schema, path: &str) -> Value {
        match schema {
            Schema::Primitive(primitive) => self.primitive(value, primitive, path),
            Schema::Array(array) => self.array(value, array, path),
            Schema::Object(object) => self.object(value, object, path),
            Schema::Unknown => value.cloned().unwrap_or(Value::Null),
        }
    }

    fn primitive(&mut self, value: Option<&Value>, primitive: &Primitive, path: &str) -> Value {
        match value {
            Some(v) if primitive.accepts(v) => v.clone(),
            _ => self.degrade(path, primitive.fallback()),
        }
    }

    fn array(&mut self, value: Option<&Value>, array: &ArraySchema, path: &str) -> Value {
        let Some(Value::Array(items)) = value else {
            return self.degrade(path, Value::Array(Vec::new()));
        };

        // Items of the wrong shape are dropped rather than padded.
        let kept = items
            .iter()
            .filter(|item| fits(item, &array.items))
            .enumerate()
            .map(|(index, item)| self.visit(Some(item), &array.items, &format!("{}/{}", path, index)))
            .collect();
        Value::Array(kept)
    }

    fn object(&mut self, value: Option<&Value>, object: &ObjectSchema, path: &str) -> Value {
        let Some(Value::Object(map)) = value else {
            let degraded = Value::Object(object.default_object());
            return self.degrade(path, degraded);
        };

        let mut out: Map<String, Value> = map.clone();
        for field in &object.fields {
            let field_path = format!("{}/{}", path, escape_pointer(&field.name));
            let present = map.get(&field.name);

            if object.is_required(&field.name) {
                let normalized = self.visit(present, &field.schema, &field_path);
                out.insert(field.name.clone(), normalized);
            } else if let Some(v) = present {
                if fits(v, &field.schema) {
                    let normalized = self.visit(Some(v), &field.schema, &field_path);
                    out.insert(field.name.clone(), normalized);
                } else {
                    out.remove(&field.name);
                }
            }
        }

        // Required names with no declared field carry no kind to check.
        for name in object.undeclared_required() {
            if !out.contains_key(name) {
                let field_path = format!("{}/{}", path, escape_pointer(name));
                let placeholder = self.degrade(&field_path, Value::Null);
                out.insert(name.clone(), placeholder);
            }
        }
        Value::Object(out)
    }

    fn degrade(&mut self, path: &str, placeholder: Value) -> Value {
        self.degraded.push(if path.is_empty() { "/".to_string() } else { path.to_string() });
        placeholder
    }
}

/// Whether a value has the outer shape a schema expects.
fn fits(value: &Value, schema: &Schema) -> bool {
    match schema {
        Schema::Primitive(primitive) => primitive.accepts(value),
        Schema::Array(_) => value.is_array(),
        Schema::Object(_) => value.is_object(),
        Schema::Unknown => true,
    }
}

pub(crate) fn escape_pointer(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}
