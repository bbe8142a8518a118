//! Core data model shared by the loop, the tool layer, and the backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum length of a [`ToolCallRecord::arguments_summary`].
const ARGUMENTS_SUMMARY_LIMIT: usize = 120;

/// Argument keys whose values are never reproduced in a record summary.
const REDACTED_KEYS: [&str; 4] = ["password", "secret", "token", "api_key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// One entry of the conversation transcript. Order is semantically
/// significant: the sequence defines the causal history presented to the
/// model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    /// Present only on assistant messages that invoke tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present only on tool messages, correlating a result to its call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Present only on tool messages: the tool that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(tool_name.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

/// Whether the backend managed to produce well-formed structured arguments
/// for a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Ok,
    Malformed,
}

/// A tool invocation requested by the model. Consumed once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id correlating the invocation to its result message.
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    #[serde(default = "ParseStatus::ok")]
    pub parse_status: ParseStatus,
}

impl ParseStatus {
    fn ok() -> Self {
        ParseStatus::Ok
    }
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            parse_status: ParseStatus::Ok,
        }
    }

    pub fn malformed(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: Map::new(),
            parse_status: ParseStatus::Malformed,
        }
    }

    pub fn is_malformed(&self) -> bool {
        self.parse_status == ParseStatus::Malformed
    }
}

/// Outcome of a tool invocation, immutable once returned.
///
/// `data` optionally carries bookkeeping keys (`execution_time_ms`,
/// `timed_out`, `retries_used`, `latency_budget_ms`) set by the tool layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn execution_time_ms(&self) -> Option<u64> {
        self.data.get("execution_time_ms").and_then(Value::as_u64)
    }

    pub fn timed_out(&self) -> bool {
        self.data
            .get("timed_out")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn retries_used(&self) -> Option<u64> {
        self.data.get("retries_used").and_then(Value::as_u64)
    }

    pub fn latency_budget_ms(&self) -> Option<u64> {
        self.data.get("latency_budget_ms").and_then(Value::as_u64)
    }
}

/// Audit-trail projection of one tool execution attempt. Exactly one record
/// exists per attempted call, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub success: bool,
    pub execution_time_ms: u64,
    /// Truncated stringification of the arguments. Secret-bearing keys are
    /// redacted before truncation.
    pub arguments_summary: String,
    pub timed_out: bool,
    pub retries_used: u32,
    pub latency_budget_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Builds the redacted, truncated argument summary stored on a record.
pub fn summarize_arguments(arguments: &Map<String, Value>) -> String {
    let mut redacted = Map::new();
    for (key, value) in arguments {
        let lowered = key.to_lowercase();
        if REDACTED_KEYS.iter().any(|k| lowered.contains(k)) {
            redacted.insert(key.clone(), Value::String("<redacted>".into()));
        } else {
            redacted.insert(key.clone(), value.clone());
        }
    }

    let mut summary = Value::Object(redacted).to_string();
    if summary.len() > ARGUMENTS_SUMMARY_LIMIT {
        let cut = summary
            .char_indices()
            .take_while(|(i, _)| *i < ARGUMENTS_SUMMARY_LIMIT)
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        summary.truncate(cut);
        summary.push('…');
    }
    summary
}

/// Schema advertised to the model for one callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}
