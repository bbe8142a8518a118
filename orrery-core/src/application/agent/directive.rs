//! Closed classification of tool names.
//!
//! Two reserved names act as loop-control signals rather than tools, and
//! `control` carries the conflict/gating policies. Everything else is either
//! search-class (budget floor, stall tracking) or an ordinary tool.

/// Sentinel: the turn should end while awaiting user input.
pub const AWAIT_RESPONSE_TOOL: &str = "await_response";
/// Sentinel: the user abandoned the request; abort the turn.
pub const NEVERMIND_TOOL: &str = "nevermind";
/// The entity-control action subject to gating and conflict normalization.
pub const CONTROL_TOOL: &str = "control";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    AwaitResponse,
    Nevermind,
    Control,
    Search,
    Other,
}

impl ToolKind {
    pub fn classify(name: &str) -> Self {
        match name {
            AWAIT_RESPONSE_TOOL => ToolKind::AwaitResponse,
            NEVERMIND_TOOL => ToolKind::Nevermind,
            CONTROL_TOOL => ToolKind::Control,
            other if other.contains("search") => ToolKind::Search,
            _ => ToolKind::Other,
        }
    }

    /// Loop-control signals that never reach the tool layer.
    pub fn is_sentinel(self) -> bool {
        matches!(self, ToolKind::AwaitResponse | ToolKind::Nevermind)
    }

    pub fn is_search(self) -> bool {
        matches!(self, ToolKind::Search)
    }
}
