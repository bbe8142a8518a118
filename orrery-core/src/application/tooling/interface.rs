use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::error::ToolError;
use crate::domain::types::ToolResult;

/// Interface to the tool layer.
///
/// The registry owns retry and timeout handling for an individual
/// invocation; the batch executor only passes the budgets through and keeps
/// uniform bookkeeping.
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        max_retries: u32,
        latency_budget_ms: u64,
    ) -> Result<ToolResult, ToolError>;

    fn has_tool(&self, name: &str) -> bool;
}

/// Kinds of recent events the relative-action gate can ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Alarm,
    Timer,
}

/// Entity/state lookup consumed by target normalization and the
/// relative-action evidence gate.
#[async_trait]
pub trait EntityLookup: Send + Sync {
    /// Whether the entity id resolves to a group/aggregate.
    async fn is_group(&self, entity_id: &str) -> bool;

    /// Whether a relevant event of this kind happened recently.
    async fn recent_event(&self, kind: EventKind) -> bool;
}

/// Fixed-answer [`EntityLookup`] for tests and headless deployments.
#[derive(Debug, Default)]
pub struct StaticEntityLookup {
    groups: HashSet<String>,
    recent_alarm: bool,
    recent_timer: bool,
}

impl StaticEntityLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, entity_id: impl Into<String>) -> Self {
        self.groups.insert(entity_id.into());
        self
    }

    pub fn with_recent_event(mut self, kind: EventKind) -> Self {
        match kind {
            EventKind::Alarm => self.recent_alarm = true,
            EventKind::Timer => self.recent_timer = true,
        }
        self
    }
}

#[async_trait]
impl EntityLookup for StaticEntityLookup {
    async fn is_group(&self, entity_id: &str) -> bool {
        self.groups.contains(entity_id)
    }

    async fn recent_event(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Alarm => self.recent_alarm,
            EventKind::Timer => self.recent_timer,
        }
    }
}
