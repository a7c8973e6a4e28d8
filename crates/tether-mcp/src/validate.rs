//! Tool-argument validation seam.
//!
//! Full JSON Schema validation belongs to the embedding host; the client
//! only invokes whatever validator it was handed. The structural default
//! below checks the object shape, required properties, and primitive
//! property types, which catches the common mistakes without pulling in
//! a schema engine.

use serde_json::Value;

/// Validates tool arguments against the tool's declared input schema.
pub trait ArgumentValidator: Send + Sync {
    /// `Err` carries a human-readable description of the first mismatch.
    fn validate(&self, arguments: &Value, schema: &Value) -> Result<(), String>;
}

/// Structural validator: object shape, `required`, and primitive types.
pub struct StructuralValidator;

impl ArgumentValidator for StructuralValidator {
    fn validate(&self, arguments: &Value, schema: &Value) -> Result<(), String> {
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Ok(());
        }
        let args = match arguments {
            Value::Object(map) => map,
            other => return Err(format!("arguments must be an object, got {}", kind_of(other))),
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !args.contains_key(name) {
                    return Err(format!("missing required property '{name}'"));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, property) in properties {
                let Some(value) = args.get(name) else { continue };
                let Some(expected) = property.get("type").and_then(Value::as_str) else {
                    continue;
                };
                if !matches_type(value, expected) {
                    return Err(format!(
                        "property '{name}' should be {expected}, got {}",
                        kind_of(value)
                    ));
                }
            }
        }

        Ok(())
    }
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type keywords are not ours to police
        _ => true,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
