//! Model backend request, response, and error types.

use std::pin::Pin;

use futures::Stream;
use serde_json::Value;
use thiserror::Error;

use crate::domain::types::{Message, ToolCall, ToolSchema};

/// One request to the LLM backend.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    /// Schema the response text must conform to, for structured tasks.
    pub response_schema: Option<Value>,
    pub response_schema_name: Option<String>,
    /// Ask the backend to enforce the schema natively instead of via
    /// prompt instructions.
    pub use_native_structured_output: bool,
    /// Number of leading transcript messages already cached backend-side.
    pub cached_prefix_length: usize,
}

impl ModelRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: Value, name: impl Into<String>) -> Self {
        self.response_schema = Some(schema);
        self.response_schema_name = Some(name.into());
        self
    }

    pub fn with_native_structured_output(mut self, native: bool) -> Self {
        self.use_native_structured_output = native;
        self
    }

    pub fn with_cached_prefix_length(mut self, length: usize) -> Self {
        self.cached_prefix_length = length;
        self
    }
}

/// One complete backend response.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One increment of a streaming backend response.
#[derive(Debug, Clone, Default)]
pub struct ResponseDelta {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Stream of incremental response deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ResponseDelta, ModelError>> + Send>>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model backend request failed: {reason}")]
    Request { reason: String, retryable: bool },
    #[error("model backend returned an invalid response: {reason}")]
    InvalidResponse { reason: String },
    #[error("model backend does not support streaming")]
    StreamingUnsupported,
}

impl ModelError {
    pub fn request(reason: impl Into<String>) -> Self {
        Self::Request {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Request { retryable: true, .. })
    }

    /// Short sanitized message safe to surface to the user. Diagnostic
    /// detail stays in logs.
    pub fn user_message(&self) -> String {
        match self {
            ModelError::Request { .. } => {
                "The assistant service is unavailable right now. Please try again.".to_string()
            }
            ModelError::InvalidResponse { .. } | ModelError::StreamingUnsupported => {
                "The assistant returned an unusable response. Please try again.".to_string()
            }
        }
    }
}
