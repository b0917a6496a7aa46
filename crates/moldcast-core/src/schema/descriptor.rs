//! Schema descriptors: the declared shape of a structured payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Primitive value kinds a descriptor can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Number,
    Boolean,
}

impl PrimitiveKind {
    /// Name used in rendered prompts and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Boolean => "boolean",
        }
    }

    /// Whether `value` has this primitive kind.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            PrimitiveKind::String => value.is_string(),
            PrimitiveKind::Number => value.is_number(),
            PrimitiveKind::Boolean => value.is_boolean(),
        }
    }

    /// Placeholder used when a value of this kind is missing.
    pub fn zero_value(&self) -> Value {
        match self {
            PrimitiveKind::String => Value::String(String::new()),
            PrimitiveKind::Number => Value::from(0),
            PrimitiveKind::Boolean => Value::Bool(false),
        }
    }
}

/// A primitive leaf in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub kind: PrimitiveKind,

    /// Closed list of allowed values (empty means unconstrained)
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,

    /// Human-readable hint shown to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Placeholder substituted when the value is missing or invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Primitive {
    /// Whether `value` has the right kind and, if constrained, is one of the choices.
    pub fn accepts(&self, value: &Value) -> bool {
        self.kind.matches(value) && (self.choices.is_empty() || self.choices.contains(value))
    }

    /// The value substituted for a missing or invalid field.
    pub fn fallback(&self) -> Value {
        match &self.default {
            Some(value) if self.accepts(value) => value.clone(),
            _ => self.kind.zero_value(),
        }
    }
}

/// An array of homogeneous items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySchema {
    pub items: Box<Schema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named field inside an object schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    #[serde(flatten)]
    pub schema: Schema,
}

/// An object with declared fields.
///
/// Fields keep declaration order so rendered prompts read in the order the
/// operation author wrote them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectSchema {
    #[serde(default)]
    pub fields: Vec<Field>,

    /// Names of fields that must always be present
    #[serde(default)]
    pub required: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn required(mut self, name: impl Into<String>, schema: Schema) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.fields.push(Field { name, schema });
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.fields.push(Field {
            name: name.into(),
            schema,
        });
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Schema> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.schema)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Required names that have no field declaration.
    pub fn undeclared_required(&self) -> impl Iterator<Item = &String> {
        self.required
            .iter()
            .filter(|name| self.field(name).is_none())
    }

    /// Object holding every required field at its fallback value.
    pub fn default_object(&self) -> Map<String, Value> {
        let mut object: Map<String, Value> = self
            .fields
            .iter()
            .filter(|f| self.is_required(&f.name))
            .map(|f| (f.name.clone(), f.schema.default_value()))
            .collect();
        for name in self.undeclared_required() {
            object.insert(name.clone(), Value::Null);
        }
        object
    }

    pub fn into_schema(self) -> Schema {
        Schema::Object(self)
    }
}

/// Declarative description of an expected output shape.
///
/// Closed sum type; every consumer matches on it recursively. `Unknown`
/// absorbs unrecognized tags when descriptors are loaded from files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Schema {
    Primitive(Primitive),
    Array(ArraySchema),
    Object(ObjectSchema),
    #[serde(other)]
    Unknown,
}

impl Schema {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        Schema::Primitive(Primitive {
            kind,
            choices: Vec::new(),
            description: None,
            default: None,
        })
    }

    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    pub fn number() -> Self {
        Self::primitive(PrimitiveKind::Number)
    }

    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }

    /// A string restricted to the given literals.
    pub fn string_enum<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Primitive(Primitive {
            kind: PrimitiveKind::String,
            choices: choices
                .into_iter()
                .map(|c| Value::String(c.into()))
                .collect(),
            description: None,
            default: None,
        })
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array(ArraySchema {
            items: Box::new(items),
            description: None,
        })
    }

    pub fn object() -> ObjectSchema {
        ObjectSchema::new()
    }

    /// Attach a human-readable hint.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        let text = Some(text.into());
        match &mut self {
            Schema::Primitive(p) => p.description = text,
            Schema::Array(a) => a.description = text,
            Schema::Object(o) => o.description = text,
            Schema::Unknown => {}
        }
        self
    }

    /// Declare the placeholder for a primitive. Ignored for other shapes.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        if let Schema::Primitive(p) = &mut self {
            p.default = Some(value.into());
        }
        self
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Schema::Primitive(p) => p.description.as_deref(),
            Schema::Array(a) => a.description.as_deref(),
            Schema::Object(o) => o.description.as_deref(),
            Schema::Unknown => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Schema::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The degraded value for this shape: empty array, fallback primitive,
    /// or an object with each required field at its own default.
    pub fn default_value(&self) -> Value {
        match self {
            Schema::Primitive(p) => p.fallback(),
            Schema::Array(_) => Value::Array(Vec::new()),
            Schema::Object(o) => Value::Object(o.default_object()),
            Schema::Unknown => Value::Null,
        }
    }

    /// Declaration mistakes: required names without a field, and primitive
    /// defaults that the primitive itself would reject. Each entry is
    /// prefixed with the JSON pointer of the offending node.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        self.collect_problems("", &mut problems);
        problems
    }

    fn collect_problems(&self, path: &str, problems: &mut Vec<String>) {
        let at = if path.is_empty() { "/" } else { path };
        match self {
            Schema::Primitive(p) => {
                if let Some(default) = &p.default {
                    if !p.accepts(default) {
                        problems.push(format!(
                            "{}: default {} is not an accepted {}",
                            at,
                            default,
                            p.kind.as_str()
                        ));
                    }
                }
            }
            Schema::Array(a) => a.items.collect_problems(&format!("{}/items", path), problems),
            Schema::Object(o) => {
                for name in o.undeclared_required() {
                    problems.push(format!("{}: required field '{}' is not declared", at, name));
                }
                for field in &o.fields {
                    field
                        .schema
                        .collect_problems(&format!("{}/{}", path, field.name), problems);
                }
            }
            Schema::Unknown => {}
        }
    }

    /// Union of several object schemas. Later fields with a name already
    /// present replace the earlier declaration; required sets are combined.
    pub fn merge_objects<'a, I>(schemas: I) -> ObjectSchema
    where
        I: IntoIterator<Item = &'a ObjectSchema>,
    {
        let mut merged = ObjectSchema::new();
        for schema in schemas {
            for field in &schema.fields {
                match merged.fields.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) => existing.schema = field.schema.clone(),
                    None => merged.fields.push(field.clone()),
                }
            }
            for name in &schema.required {
                if !merged.required.contains(name) {
                    merged.required.push(name.clone());
                }
            }
        }
        merged
    }
}
