//! Structured model output: extraction, constrained schema validation, and
//! the structured-task entry point.
//!
//! The validator covers the JSON-Schema subset needed to gate model output
//! (`type`, `enum`, `properties`, `required`, `additionalProperties`,
//! `items`). It is deliberately not a general validator.
//!
//! Extraction and validation fail differently on purpose: an
//! [`StructuredError::InvalidJson`] and a [`StructuredError::SchemaMismatch`]
//! produce different corrective messages upstream.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::types::Message;
use crate::infrastructure::model::{ModelBackend, ModelError, ModelRequest};

/// A restricted JSON-Schema document used to validate model output.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema(Value);

impl StructuredSchema {
    pub fn new(schema: Value) -> Self {
        Self(schema)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Depth-first validation, short-circuiting on the first violation.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        validate_node(value, &self.0, "$")
    }
}

/// First violation found while validating a value against a schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {reason}")]
pub struct SchemaViolation {
    pub path: String,
    pub reason: String,
}

fn violation(path: &str, reason: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn validate_node(value: &Value, schema: &Value, path: &str) -> Result<(), SchemaViolation> {
    // Unknown or absent `type` is permissive.
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let matches = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            // Booleans are not numbers here, even though some languages
            // conflate them.
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(violation(path, format!("expected type '{expected}'")));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(violation(path, "value not in enum"));
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(violation(path, format!("missing required key '{key}'")));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (key, sub_schema) in properties {
                if let Some(sub_value) = object.get(key) {
                    validate_node(sub_value, sub_schema, &format!("{path}.{key}"))?;
                }
            }
        }

        if schema.get("additionalProperties").and_then(Value::as_bool) == Some(false) {
            for key in object.keys() {
                let declared = properties.is_some_and(|p| p.contains_key(key));
                if !declared {
                    return Err(violation(path, format!("unexpected key '{key}'")));
                }
            }
        }
    }

    if let (Some(items), Some(item_schema)) = (value.as_array(), schema.get("items")) {
        for (index, item) in items.iter().enumerate() {
            validate_node(item, item_schema, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum StructuredError {
    /// No JSON payload could be extracted from the model output.
    #[error("invalid JSON in model output: {reason}")]
    InvalidJson { reason: String },
    /// The payload parsed but does not match the expected schema.
    #[error("model output does not match schema: {reason}")]
    SchemaMismatch { reason: String },
    #[error(transparent)]
    Backend(#[from] ModelError),
}

impl StructuredError {
    pub fn user_message(&self) -> String {
        match self {
            StructuredError::InvalidJson { .. } => {
                "The assistant did not return readable structured data. Please try again."
                    .to_string()
            }
            StructuredError::SchemaMismatch { .. } => {
                "The assistant returned data in an unexpected shape. Please try again.".to_string()
            }
            StructuredError::Backend(err) => err.user_message(),
        }
    }
}

/// Pulls a JSON payload out of raw model text.
///
/// Tries, in order: the whole text; each fenced code block; decreasing-length
/// substrings starting at the first `{` or `[`.
pub fn extract_json(text: &str) -> Result<Value, StructuredError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    for block in fenced_blocks(trimmed) {
        let candidate = block.trim();
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Ok(value);
        }
        let stripped = candidate
            .strip_prefix("json")
            .or_else(|| candidate.strip_prefix("JSON"))
            .map(str::trim);
        if let Some(stripped) = stripped {
            if let Ok(value) = serde_json::from_str::<Value>(stripped) {
                return Ok(value);
            }
        }
    }

    if let Some(start) = trimmed.find(['{', '[']) {
        let tail = &trimmed[start..];
        for end in (1..=tail.len()).rev() {
            if !tail.is_char_boundary(end) {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(&tail[..end]) {
                return Ok(value);
            }
        }
    }

    Err(StructuredError::InvalidJson {
        reason: "no JSON payload found in model output".into(),
    })
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // The info string (e.g. "json") runs to end of line when present.
        let body = match after.find('\n') {
            Some(newline) if after[..newline].len() <= 8 => &after[newline + 1..],
            _ => after,
        };
        match body.find("```") {
            Some(close) => {
                blocks.push(&body[..close]);
                rest = &body[close + 3..];
            }
            None => break,
        }
    }
    blocks
}

/// Runs one structured task against the backend.
///
/// The first attempt asks for native structured output. A backend failure
/// there triggers exactly one fallback attempt in non-native mode with the
/// schema injected as a system instruction. The response text then goes
/// through extraction and validation.
pub async fn run_structured_task(
    backend: &dyn ModelBackend,
    messages: Vec<Message>,
    schema: &StructuredSchema,
    schema_name: &str,
) -> Result<Value, StructuredError> {
    let request = ModelRequest::new(messages.clone())
        .with_response_schema(schema.as_value().clone(), schema_name)
        .with_native_structured_output(true);

    let response = match backend.chat(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "Native structured output failed; retrying in prompt mode");
            let mut fallback_messages = messages;
            fallback_messages.push(Message::system(schema_instruction(schema)));
            let fallback = ModelRequest::new(fallback_messages)
                .with_response_schema(schema.as_value().clone(), schema_name)
                .with_native_structured_output(false);
            backend.chat(fallback).await?
        }
    };

    let value = extract_json(&response.content)?;
    schema
        .validate(&value)
        .map_err(|violation| StructuredError::SchemaMismatch {
            reason: violation.to_string(),
        })?;
    Ok(value)
}

fn schema_instruction(schema: &StructuredSchema) -> String {
    let schema_json = serde_json::to_string_pretty(schema.as_value())
        .expect("serializing Value to JSON cannot fail");
    format!(
        "Respond with a single JSON document conforming to this schema:\n\
         ```json\n{schema_json}\n```\n\
         Respond ONLY with the JSON. No markdown, no explanation."
    )
}
