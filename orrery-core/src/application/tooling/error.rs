use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("tool '{tool}' exceeded its latency budget of {budget_ms}ms")]
    Timeout { tool: String, budget_ms: u64 },
    #[error("failed to execute tool '{tool}': {reason}")]
    Execution { tool: String, reason: String },
}

impl ToolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ToolError::Timeout { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            ToolError::UnknownTool(name) => {
                format!("The \"{name}\" capability is not available.")
            }
            ToolError::Timeout { tool, .. } => {
                format!("The \"{tool}\" action took too long and was stopped.")
            }
            ToolError::Execution { tool, .. } => {
                format!("The \"{tool}\" action could not be completed.")
            }
        }
    }
}
