use crate::domain::types::{Message, ToolCallRecord, ToolSchema};

/// One turn's input to the orchestration loop.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub messages: Vec<Message>,
    pub tool_schemas: Vec<ToolSchema>,
    /// Leading transcript messages already cached backend-side.
    pub cached_prefix_length: usize,
    /// Enables the session-scoped guardrails (pending confirmation,
    /// follow-up counter) when present.
    pub session_id: Option<String>,
    /// Model-call bound for this turn; the policy default applies when
    /// `None`.
    pub max_iterations: Option<u32>,
}

impl TurnRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tool_schemas: Vec::new(),
            cached_prefix_length: 0,
            session_id: None,
            max_iterations: None,
        }
    }

    pub fn with_tool_schemas(mut self, tool_schemas: Vec<ToolSchema>) -> Self {
        self.tool_schemas = tool_schemas;
        self
    }

    pub fn with_cached_prefix_length(mut self, length: usize) -> Self {
        self.cached_prefix_length = length;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

/// What one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    /// True when the turn ended awaiting user input (clarification or
    /// confirmation).
    pub needs_followup: bool,
    /// Model calls consumed.
    pub iterations: u32,
    /// One record per tool call attempted, in execution order.
    pub records: Vec<ToolCallRecord>,
}
