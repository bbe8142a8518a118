//! Per-session conversation state for the Orrery agent runtime.
//!
//! A session outlives a single agent turn. Two pieces of state live here:
//! a [`PendingCriticalAction`] awaiting explicit user confirmation, and a
//! counter of consecutive clarification requests used to break infinite
//! follow-up loops. The agent loop never touches this state directly; it
//! goes through the [`SessionStore`] trait so the guardrail logic can be
//! tested against an in-memory fake and production deployments can swap in
//! a shared store.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// A critical tool call intercepted by the agent loop, parked until the
/// user explicitly confirms or denies it.
///
/// At most one exists per session; storing a new one replaces the old.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCriticalAction {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    /// Loop iteration in which the action was intercepted.
    pub created_at: u32,
    /// Semantic domains the action touches (e.g. `lock`, `garage_door`).
    pub target_domains: BTreeSet<String>,
}

impl PendingCriticalAction {
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
        created_at: u32,
        target_domains: BTreeSet<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            created_at,
            target_domains,
        }
    }

    /// Short human-readable description used in confirmation prompts.
    pub fn describe(&self) -> String {
        let targets: Vec<&str> = self
            .arguments
            .get("targets")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if targets.is_empty() {
            self.tool_name.clone()
        } else {
            format!("{} on {}", self.tool_name, targets.join(", "))
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store failure: {reason}")]
    Store { reason: String },
}

/// Narrow interface to per-session mutable state.
///
/// Implementations are responsible for serializing concurrent access for
/// the same session id; callers must not assume exclusive access.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn pending_critical_action(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingCriticalAction>, SessionError>;

    async fn set_pending_critical_action(
        &self,
        session_id: &str,
        action: PendingCriticalAction,
    ) -> Result<(), SessionError>;

    async fn clear_pending_critical_action(&self, session_id: &str) -> Result<(), SessionError>;

    /// Increments the consecutive-clarification counter and returns the
    /// new value.
    async fn increment_followups(&self, session_id: &str) -> Result<u32, SessionError>;

    async fn reset_followups(&self, session_id: &str) -> Result<(), SessionError>;
}

#[derive(Debug, Default, Clone)]
struct SessionState {
    pending: Option<PendingCriticalAction>,
    followups: u32,
}

/// In-memory [`SessionStore`], keyed by session id.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn pending_critical_action(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingCriticalAction>, SessionError> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).and_then(|s| s.pending.clone()))
    }

    async fn set_pending_critical_action(
        &self,
        session_id: &str,
        action: PendingCriticalAction,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session_id.to_string()).or_default();
        if state.pending.is_some() {
            debug!(session_id, "Replacing existing pending critical action");
        }
        state.pending = Some(action);
        Ok(())
    }

    async fn clear_pending_critical_action(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(session_id) {
            state.pending = None;
        }
        Ok(())
    }

    async fn increment_followups(&self, session_id: &str) -> Result<u32, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(session_id.to_string()).or_default();
        state.followups += 1;
        Ok(state.followups)
    }

    async fn reset_followups(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(session_id) {
            state.followups = 0;
        }
        Ok(())
    }
}

/// Generates a fresh session id.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
