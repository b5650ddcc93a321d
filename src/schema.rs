//! JSON-schema checks for tool arguments and structured outputs.
//!
//! Schemas are generated with `schemars` and checked with `jsonschema`.

use std::fmt;

use schemars::JsonSchema;
use serde_json::{Map, Value};

/// First mismatch found between a value and a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON-pointer location of the offending value, `""` for the root.
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "at {}: {}", self.path, self.message)
        }
    }
}

impl std::error::Error for SchemaViolation {}

/// JSON schema of a Rust type, as advertised to the model.
pub fn schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Checks `value` against `schema`, reporting the first violation.
///
/// A schema that does not compile is itself reported as a violation at the root.
pub fn validate(schema: &Value, value: &Value) -> Result<(), SchemaViolation> {
    let validator = jsonschema::Validator::new(schema).map_err(|e| SchemaViolation {
        path: String::new(),
        message: format!("invalid schema: {}", e),
    })?;
    let result = match validator.iter_errors(value).next() {
        None => Ok(()),
        Some(error) => Err(SchemaViolation {
            path: error.instance_path.to_string(),
            message: error.to_string(),
        }),
    };
    result
}
