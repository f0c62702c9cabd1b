//! Minimal structural validation and retry-with-backoff helpers for
//! `ToolRegistry::invoke` (§4.4).

use serde_json::Value;

/// A deliberately small structural check — required keys and primitive
/// JSON types — rather than a full JSON Schema implementation. Good enough
/// to catch malformed agent-produced tool calls before they reach a tool.
pub fn validate_against_schema(value: &Value, schema: &Value) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    if schema_obj.get("type").and_then(Value::as_str) == Some("object") && !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        let obj = value.as_object().ok_or("expected a JSON object")?;
        for key in required {
            let key = key.as_str().unwrap_or_default();
            if !obj.contains_key(key) {
                return Err(format!("missing required field `{key}`"));
            }
        }
    }
    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        let obj = value.as_object().ok_or("expected a JSON object")?;
        for (key, prop_schema) in properties {
            let Some(field_value) = obj.get(key) else {
                continue;
            };
            if let Some(expected_type) = prop_schema.get("type").and_then(Value::as_str) {
                if !type_matches(field_value, expected_type) {
                    return Err(format!("field `{key}` does not match type `{expected_type}`"));
                }
            }
        }
    }
    Ok(())
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_required_field_is_rejected() {
        let schema = json!({"type": "object", "required": ["query"]});
        let err = validate_against_schema(&json!({}), &schema).unwrap_err();
        assert!(err.contains("query"));
    }

    #[test]
    fn mismatched_property_type_is_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}}
        });
        let err = validate_against_schema(&json!({"limit": "ten"}), &schema).unwrap_err();
        assert!(err.contains("limit"));
    }

    #[test]
    fn well_formed_input_passes() {
        let schema = json!({
            "type": "object",
            "required": ["query"],
            "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}}
        });
        assert!(validate_against_schema(&json!({"query": "acme", "limit": 5}), &schema).is_ok());
    }
}
