//! Model backend trait.

use async_trait::async_trait;

use super::types::{DeltaStream, ModelError, ModelRequest, ModelResponse};

/// Interface to the LLM backend.
///
/// `chat_stream` defaults to [`ModelError::StreamingUnsupported`]; the agent
/// loop falls back to the blocking `chat` path when streaming setup fails,
/// so backends without a streaming transport only implement `chat`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send a blocking chat request.
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Open a streaming chat request yielding incremental deltas.
    async fn chat_stream(&self, _request: ModelRequest) -> Result<DeltaStream, ModelError> {
        Err(ModelError::StreamingUnsupported)
    }
}
