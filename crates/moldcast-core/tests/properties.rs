use moldcast_core::{normalize, repair, sanitize, try_repair, Schema};
use proptest::prelude::*;
use proptest::sample::Index;
use proptest::test_runner::Config as ProptestConfig;
use serde_json::{Map, Value};

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        // Biased toward the characters the sanitizer cares about
        "[`{}\\[\\]\"a-z :,\n\t]{0,48}",
        "(Sure! )?(```(json)?\n)?[{\\[][a-z0-9\":, \\[\\]{}]{0,32}(\n```)?( Done.)?",
    ]
}

fn arb_json_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e6f64..1.0e6f64).prop_map(Value::from),
        "\\PC{0,8}".prop_map(Value::String),
        "[a-z\\\\\"{}\\[\\],: ]{0,8}".prop_map(Value::String),
    ]
}

fn arb_json() -> impl Strategy<Value = Value> {
    arb_json_leaf().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..5)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// A JSON document whose root is an object or array.
fn arb_aggregate() -> impl Strategy<Value = Value> {
    arb_json().prop_map(|v| match v {
        Value::Array(_) | Value::Object(_) => v,
        leaf => {
            let mut map = Map::new();
            map.insert("value".to_string(), leaf);
            Value::Object(map)
        }
    })
}

fn arb_leaf_schema() -> impl Strategy<Value = Schema> {
    prop_oneof![
        Just(Schema::string()),
        Just(Schema::number()),
        Just(Schema::boolean()),
        Just(Schema::string_enum(["high", "medium", "low"])),
        Just(Schema::string_enum(["yes", "no"]).with_default("no")),
        // A default of the wrong kind must not leak through
        Just(Schema::number().with_default("ten")),
        Just(Schema::Unknown),
    ]
}

fn arb_schema() -> impl Strategy<Value = Schema> {
    arb_leaf_schema().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            inner.clone().prop_map(Schema::array),
            arb_fields(inner),
        ]
    })
}

fn arb_fields(inner: impl Strategy<Value = Schema> + Clone) -> impl Strategy<Value = Schema> {
    (
        prop::collection::btree_map("[a-e]", (inner, any::<bool>()), 0..5),
        // Required names that never get a field declaration
        prop::collection::btree_set("[f-h]", 0..2),
    )
        .prop_map(|(fields, undeclared)| {
            let mut object = fields
                .into_iter()
                .fold(Schema::object(), |object, (name, (schema, required))| {
                    if required {
                        object.required(name, schema)
                    } else {
                        object.optional(name, schema)
                    }
                });
            object.required.extend(undeclared);
            object.into_schema()
        })
}

/// Whether `value` has the right kind everywhere the schema requires one.
fn conforms(value: &Value, schema: &Schema) -> bool {
    match schema {
        Schema::Primitive(p) => p.kind.matches(value),
        Schema::Array(a) => value
            .as_array()
            .is_some_and(|items| items.iter().all(|item| conforms(item, &a.items))),
        Schema::Object(o) => value.as_object().is_some_and(|map| {
            o.required.iter().all(|name| map.contains_key(name))
                && o.fields
                    .iter()
                    .filter(|f| o.is_required(&f.name))
                    .all(|f| map.get(&f.name).is_some_and(|v| conforms(v, &f.schema)))
        }),
        Schema::Unknown => true,
    }
}

fn prefix(text: &str, cut: Index) -> &str {
    let mut end = cut.index(text.len() + 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        .. ProptestConfig::default()
    })]

    #[test]
    fn sanitize_is_idempotent(text in arb_text()) {
        let once = sanitize(&text);
        prop_assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn repaired_prefix_always_parses(value in arb_json(), pretty in any::<bool>(), cut in any::<Index>()) {
        let text = if pretty {
            serde_json::to_string_pretty(&value).unwrap()
        } else {
            serde_json::to_string(&value).unwrap()
        };
        let truncated = prefix(&text, cut);

        let repaired = repair(&sanitize(truncated));
        prop_assert!(
            serde_json::from_str::<Value>(&repaired).is_ok(),
            "{:?} repaired to unparseable {:?}", truncated, repaired
        );
    }

    #[test]
    fn aggregate_prefix_is_recovered_without_fallback(
        value in arb_aggregate(),
        pretty in any::<bool>(),
        cut in any::<Index>(),
    ) {
        let text = if pretty {
            serde_json::to_string_pretty(&value).unwrap()
        } else {
            serde_json::to_string(&value).unwrap()
        };
        let truncated = prefix(&text, cut);
        prop_assume!(!truncated.trim().is_empty());

        let cleaned = sanitize(truncated);
        prop_assert!(try_repair(&cleaned).is_some(), "could not repair {:?}", cleaned);
    }

    #[test]
    fn normalize_fills_every_required_field(schema in arb_fields(arb_schema().boxed()), partial in arb_json()) {
        let value = normalize(&partial, &schema);
        prop_assert!(conforms(&value, &schema), "{} does not conform", value);
    }
}

#[test]
fn repair_keeps_completed_elements() {
    let repaired = repair(&sanitize(r#"{"a": 1, "list": [1, 2,"#));
    let value: Value = serde_json::from_str(&repaired).unwrap();
    assert_eq!(value["list"], serde_json::json!([1, 2]));
}
