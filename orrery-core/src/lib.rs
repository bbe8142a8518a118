//! Orrery agent runtime.
//!
//! The orchestration loop that lets a language model drive multi-step
//! tasks: it calls the model, interprets the response for tool invocations,
//! executes tools concurrently with retry/timeout bookkeeping, feeds results
//! back, and repeats until a final answer or a guardrail ends the turn.
//! External collaborators (the LLM backend, the tool layer, the host
//! transcript surface, session state, and entity lookups) sit behind
//! injected traits.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::agent::{Agent, AgentError, TurnOutcome, TurnRequest};
pub use application::structured::{StructuredError, StructuredSchema, extract_json, run_structured_task};
pub use application::tooling::{
    BatchItem, EntityLookup, EventKind, StaticEntityLookup, ToolError, ToolRegistry, execute_batch,
};
pub use application::transcript::{NullTranscriptSink, TranscriptDelta, TranscriptSink};
pub use config::AgentPolicy;
pub use domain::types::{
    Message, MessageRole, ParseStatus, ToolCall, ToolCallRecord, ToolResult, ToolSchema,
};
pub use infrastructure::model::{ModelBackend, ModelError, ModelRequest, ModelResponse};

pub use orrery_session::{MemorySessionStore, PendingCriticalAction, SessionStore};

use tracing_subscriber::{EnvFilter, fmt};

/// Installs the process-wide tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_level(true)
            .init();
    });
}
