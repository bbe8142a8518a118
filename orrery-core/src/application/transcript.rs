//! Host transcript sink interface.
//!
//! The loop forwards incremental output to the host conversation surface as
//! it arrives. Sink failures must never fail the turn; callers log and move
//! on.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::{MessageRole, ToolCall};

/// One increment of the turn's visible output, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptDelta {
    Role(MessageRole),
    Content(String),
    ToolCalls(Vec<ToolCall>),
}

#[derive(Debug, Error)]
#[error("transcript sink rejected delta: {reason}")]
pub struct SinkError {
    pub reason: String,
}

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn push(&self, delta: TranscriptDelta) -> Result<(), SinkError>;
}

/// Sink that discards everything, for headless callers.
#[derive(Debug, Default)]
pub struct NullTranscriptSink;

#[async_trait]
impl TranscriptSink for NullTranscriptSink {
    async fn push(&self, _delta: TranscriptDelta) -> Result<(), SinkError> {
        Ok(())
    }
}
