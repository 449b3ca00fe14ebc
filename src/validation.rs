use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{GatewayError, Result};
use crate::models::openai::ChatTool;

const MAX_TOOLS: usize = 128;
const MAX_TOOL_NAME_LEN: usize = 64;
const MAX_SCHEMA_DEPTH: usize = 10;

/// Check that the client presented a well-formed credential.
///
/// Accepts `Authorization: Bearer <token>` or `x-api-key: <token>`. The token
/// itself is not checked against anything.
pub fn validate_client_auth(headers: &HeaderMap) -> Result<()> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| GatewayError::Unauthorized("authorization header is not valid text".into()))?;
        return match value.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(()),
            _ => Err(GatewayError::Unauthorized(
                "authorization header must be 'Bearer <token>'".into(),
            )),
        };
    }

    if let Some(value) = headers.get("x-api-key") {
        return match value.to_str() {
            Ok(key) if !key.trim().is_empty() => Ok(()),
            _ => Err(GatewayError::Unauthorized("x-api-key header is empty".into())),
        };
    }

    Err(GatewayError::Unauthorized(
        "missing authorization or x-api-key header".into(),
    ))
}

/// Validate tool definitions before translation
pub fn validate_tools(tools: &[ChatTool]) -> Result<()> {
    if tools.len() > MAX_TOOLS {
        return Err(GatewayError::UnsupportedRequestShape(format!(
            "Too many tools: {} (max {})",
            tools.len(),
            MAX_TOOLS
        )));
    }

    let mut names = HashSet::new();
    for tool in tools {
        if tool.kind != "function" {
            return Err(GatewayError::UnsupportedRequestShape(format!(
                "Unsupported tool type: {}",
                tool.kind
            )));
        }

        let name = &tool.function.name;
        if name.is_empty() {
            return Err(GatewayError::UnsupportedRequestShape(
                "Tool name cannot be empty".into(),
            ));
        }
        if name.len() > MAX_TOOL_NAME_LEN {
            return Err(GatewayError::UnsupportedRequestShape(format!(
                "Tool name too long: {} (max {} characters)",
                name.len(),
                MAX_TOOL_NAME_LEN
            )));
        }
        if !names.insert(name.as_str()) {
            return Err(GatewayError::UnsupportedRequestShape(format!(
                "Duplicate tool name: {}",
                name
            )));
        }

        if let Some(schema) = &tool.function.parameters {
            validate_json_schema(schema, 0)?;
        }
    }

    Ok(())
}

/// Recursively validate JSON schema
fn validate_json_schema(schema: &Value, depth: usize) -> Result<()> {
    if depth > MAX_SCHEMA_DEPTH {
        return Err(GatewayError::UnsupportedRequestShape(format!(
            "Schema nesting too deep (max {})",
            MAX_SCHEMA_DEPTH
        )));
    }

    let Some(object) = schema.as_object() else {
        return Err(GatewayError::UnsupportedRequestShape(
            "Tool parameters must be a JSON object".into(),
        ));
    };

    let valid_types = [
        "object", "array", "string", "number", "integer", "boolean", "null",
    ];
    match object.get("type") {
        None => {}
        Some(Value::String(t)) if valid_types.contains(&t.as_str()) => {}
        Some(Value::Array(types))
            if types
                .iter()
                .all(|t| t.as_str().is_some_and(|t| valid_types.contains(&t))) => {}
        Some(other) => {
            return Err(GatewayError::UnsupportedRequestShape(format!(
                "Invalid schema type: {}",
                other
            )));
        }
    }

    if let Some(properties) = object.get("properties").and_then(Value::as_object) {
        for (name, prop_schema) in properties {
            if name.is_empty() {
                return Err(GatewayError::UnsupportedRequestShape(
                    "Property name cannot be empty".into(),
                ));
            }
            validate_json_schema(prop_schema, depth + 1)?;
        }
    }

    if let Some(items) = object.get("items")
        && items.is_object()
    {
        validate_json_schema(items, depth + 1)?;
    }

    if let (Some(min), Some(max)) = (
        object.get("minimum").and_then(Value::as_f64),
        object.get("maximum").and_then(Value::as_f64),
    ) && min > max
    {
        return Err(GatewayError::UnsupportedRequestShape(format!(
            "Invalid range: minimum ({}) > maximum ({})",
            min, max
        )));
    }

    Ok(())
}
