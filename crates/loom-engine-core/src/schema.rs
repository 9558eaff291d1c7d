//! # Structural Output Schemas
//!
//! Agents declare the shape of their output with a [`Schema`]; the runtime
//! validates the raw provider result against it before any state update is
//! applied. Schemas also render to a stable canonical JSON form that
//! participates in the recording fingerprint, so a schema change changes
//! the recording identity.
//!
//! This is intentionally a small structural validator, not a JSON Schema
//! implementation: `string | number | boolean | any | array<T> |
//! object{fields, required}` covers what agent outputs need.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// Accepts any value, including null.
    Any,
    Boolean,
    Number,
    String,
    Array(Box<Schema>),
    Object {
        fields: BTreeMap<String, Schema>,
        required: BTreeSet<String>,
    },
}

impl Schema {
    pub fn any() -> Self {
        Schema::Any
    }

    pub fn boolean() -> Self {
        Schema::Boolean
    }

    pub fn number() -> Self {
        Schema::Number
    }

    pub fn string() -> Self {
        Schema::String
    }

    pub fn array(item: Schema) -> Self {
        Schema::Array(Box::new(item))
    }

    /// An object schema where every listed field is required.
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        let fields: BTreeMap<String, Schema> =
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        let required = fields.keys().cloned().collect();
        Schema::Object { fields, required }
    }

    /// Mark a field optional. No-op for non-object schemas.
    pub fn optional(mut self, field: &str) -> Self {
        if let Schema::Object { required, .. } = &mut self {
            required.remove(field);
        }
        self
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), ValidationError> {
        match self {
            Schema::Any => Ok(()),
            Schema::Boolean => match value {
                Value::Bool(_) => Ok(()),
                other => Err(type_mismatch("boolean", other, path)),
            },
            Schema::Number => match value {
                Value::Number(_) => Ok(()),
                other => Err(type_mismatch("number", other, path)),
            },
            Schema::String => match value {
                Value::String(_) => Ok(()),
                other => Err(type_mismatch("string", other, path)),
            },
            Schema::Array(item) => match value {
                Value::Array(items) => {
                    for (i, element) in items.iter().enumerate() {
                        item.validate_at(element, &format!("{path}[{i}]"))?;
                    }
                    Ok(())
                }
                other => Err(type_mismatch("array", other, path)),
            },
            Schema::Object { fields, required } => match value {
                Value::Object(map) => {
                    for field in required {
                        if !map.contains_key(field) {
                            return Err(ValidationError::at(
                                format!("missing required field {field:?}"),
                                path,
                            ));
                        }
                    }
                    for (key, field_schema) in fields {
                        if let Some(field_value) = map.get(key) {
                            field_schema.validate_at(field_value, &format!("{path}.{key}"))?;
                        }
                    }
                    Ok(())
                }
                other => Err(type_mismatch("object", other, path)),
            },
        }
    }

    /// Stable JSON rendering used in the recording fingerprint.
    pub fn canonical(&self) -> Value {
        match self {
            Schema::Any => json!({"type": "any"}),
            Schema::Boolean => json!({"type": "boolean"}),
            Schema::Number => json!({"type": "number"}),
            Schema::String => json!({"type": "string"}),
            Schema::Array(item) => json!({"type": "array", "items": item.canonical()}),
            Schema::Object { fields, required } => {
                let fields: serde_json::Map<String, Value> = fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.canonical()))
                    .collect();
                let required: Vec<&String> = required.iter().collect();
                json!({"type": "object", "fields": fields, "required": required})
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_mismatch(expected: &str, actual: &Value, path: &str) -> ValidationError {
    ValidationError::at(
        format!("expected {expected}, got {}", type_name(actual)),
        path,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer_schema() -> Schema {
        Schema::object([("answer", Schema::string())])
    }

    #[test]
    fn valid_output_passes() {
        assert!(answer_schema().validate(&json!({"answer": "4"})).is_ok());
    }

    #[test]
    fn missing_required_field_reports_path() {
        let err = answer_schema().validate(&json!({})).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("$"));
        assert!(err.message.contains("answer"));
    }

    #[test]
    fn nested_mismatch_reports_deep_path() {
        let schema = Schema::object([(
            "steps",
            Schema::array(Schema::object([("note", Schema::string())])),
        )]);
        let err = schema
            .validate(&json!({"steps": [{"note": "ok"}, {"note": 7}]}))
            .unwrap_err();
        assert_eq!(err.path.as_deref(), Some("$.steps[1].note"));
    }

    #[test]
    fn optional_fields_may_be_absent_but_are_still_typed() {
        let schema = Schema::object([("answer", Schema::string()), ("note", Schema::string())])
            .optional("note");
        assert!(schema.validate(&json!({"answer": "4"})).is_ok());
        let err = schema
            .validate(&json!({"answer": "4", "note": 1}))
            .unwrap_err();
        assert_eq!(err.path.as_deref(), Some("$.note"));
    }

    #[test]
    fn canonical_form_is_stable() {
        let a = Schema::object([("b", Schema::number()), ("a", Schema::string())]);
        let b = Schema::object([("a", Schema::string()), ("b", Schema::number())]);
        assert_eq!(a.canonical(), b.canonical());
        let rendered = crate::hash::to_canonical_json(&a.canonical());
        assert_eq!(rendered, crate::hash::to_canonical_json(&b.canonical()));
    }
}
