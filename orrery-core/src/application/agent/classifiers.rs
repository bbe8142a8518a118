//! Sentinel intent classifiers.
//!
//! Two narrow model calls that disambiguate situations the loop cannot
//! resolve locally. Both are constrained to closed-enum response schemas,
//! carry no tools, and fail closed: any backend failure or unparseable
//! output degrades to the safest verdict instead of propagating.

use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use orrery_session::PendingCriticalAction;

use crate::application::structured::{StructuredSchema, run_structured_task};
use crate::domain::types::Message;
use crate::infrastructure::model::ModelBackend;

const CONFIRMATION_INSTRUCTIONS: &str = "You are classifying a user's reply to a pending \
confirmation request for a sensitive action. Decide whether the reply confirms the action, \
denies it, or is unclear, and how confident you are. Do not call tools. Respond only with JSON.";

const ROUTE_INSTRUCTIONS: &str = "You are checking whether an assistant reply silently skipped \
an action it should have taken. Classify the user's request as an alarm action, a timer action, \
or neither, and say whether the assistant should retry with a tool. Do not call tools. Respond \
only with JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmDecision {
    Confirm,
    Deny,
    Unclear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ConfirmationVerdict {
    pub decision: ConfirmDecision,
    pub confidence: Confidence,
}

impl ConfirmationVerdict {
    /// Safest verdict: leave the pending action parked and ask again.
    fn fail_closed() -> Self {
        Self {
            decision: ConfirmDecision::Unclear,
            confidence: Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Alarm,
    Timer,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RouteVerdict {
    pub route: Route,
    pub needs_retry: bool,
    pub confidence: Confidence,
}

impl RouteVerdict {
    fn fail_closed() -> Self {
        Self {
            route: Route::None,
            needs_retry: false,
            confidence: Confidence::Low,
        }
    }
}

/// Classifies the latest user reply against a pending critical action.
pub async fn classify_confirmation(
    backend: &dyn ModelBackend,
    pending: &PendingCriticalAction,
    user_reply: &str,
) -> ConfirmationVerdict {
    let schema = StructuredSchema::new(json!({
        "type": "object",
        "properties": {
            "decision": {"type": "string", "enum": ["confirm", "deny", "unclear"]},
            "confidence": {"type": "string", "enum": ["high", "medium", "low"]}
        },
        "required": ["decision", "confidence"],
        "additionalProperties": false
    }));

    let messages = vec![
        Message::system(CONFIRMATION_INSTRUCTIONS),
        Message::user(format!(
            "Pending action: {}.\nUser reply: {user_reply}",
            pending.describe()
        )),
    ];

    match run_structured_task(backend, messages, &schema, "confirmation_verdict").await {
        Ok(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(error = %err, "Confirmation verdict did not deserialize; failing closed");
            ConfirmationVerdict::fail_closed()
        }),
        Err(err) => {
            warn!(error = %err, "Confirmation classifier failed; failing closed");
            ConfirmationVerdict::fail_closed()
        }
    }
}

/// Decides whether a tool-less reply skipped an alarm/timer action.
pub async fn classify_missing_route(
    backend: &dyn ModelBackend,
    user_text: &str,
    assistant_text: &str,
) -> RouteVerdict {
    let schema = StructuredSchema::new(json!({
        "type": "object",
        "properties": {
            "route": {"type": "string", "enum": ["alarm", "timer", "none"]},
            "needs_retry": {"type": "boolean"},
            "confidence": {"type": "string", "enum": ["high", "medium", "low"]}
        },
        "required": ["route", "needs_retry", "confidence"],
        "additionalProperties": false
    }));

    let messages = vec![
        Message::system(ROUTE_INSTRUCTIONS),
        Message::user(format!(
            "User request: {user_text}\nAssistant reply: {assistant_text}"
        )),
    ];

    match run_structured_task(backend, messages, &schema, "route_verdict").await {
        Ok(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            warn!(error = %err, "Route verdict did not deserialize; failing closed");
            RouteVerdict::fail_closed()
        }),
        Err(err) => {
            warn!(error = %err, "Route classifier failed; failing closed");
            RouteVerdict::fail_closed()
        }
    }
}
