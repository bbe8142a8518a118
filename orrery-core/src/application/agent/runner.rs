//! The orchestration loop.
//!
//! One [`Agent::run_turn`] call drives one task/turn: model call, response
//! interpretation, guardrails, tool fan-out, and termination. The loop owns
//! its transcript for the duration of the turn; per-session state lives
//! behind the injected [`SessionStore`].

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orrery_session::{MemorySessionStore, PendingCriticalAction, SessionStore};

use super::classifiers::{self, ConfirmDecision, Confidence, Route};
use super::conflict;
use super::directive::ToolKind;
use super::errors::AgentError;
use super::heuristics;
use super::models::{TurnOutcome, TurnRequest};
use crate::application::tooling::{
    BatchItem, EntityLookup, EventKind, StaticEntityLookup, ToolRegistry, execute_batch,
};
use crate::application::transcript::{NullTranscriptSink, TranscriptDelta, TranscriptSink};
use crate::config::AgentPolicy;
use crate::domain::types::{Message, MessageRole, ToolCall, ToolResult};
use crate::infrastructure::model::{DeltaStream, ModelBackend, ModelError, ModelRequest, ModelResponse};

// Corrective instructions injected on guardrail retries.
const PROSE_TOOL_CALL_NUDGE: &str = "Your last reply described a tool call in prose instead of \
invoking it. Invoke the tool through the tools interface, or answer directly without mentioning \
tools.";
const MALFORMED_CALL_NUDGE: &str = "Your last tool call carried malformed arguments. Re-issue \
exactly one well-formed tool call with valid JSON arguments.";
const EMPTY_RESPONSE_NUDGE: &str = "You returned an empty response. Use the available tools, or \
answer the user directly.";
const MISSING_ROUTE_NUDGE: &str = "The user asked for an action that requires a tool. Invoke the \
appropriate tool now instead of describing the outcome.";
const EVIDENCE_ONLY_NUDGE: &str = "Further lookups are unavailable. Answer now using only the \
information already gathered in this conversation, and say so if it is incomplete.";

// User-facing terminal messages. Kept generic on purpose; diagnostic detail
// goes to logs only.
const CLARIFICATION_FALLBACK: &str = "I couldn't complete that request as stated. Could you \
rephrase it?";
const FOLLOWUP_LIMIT_MESSAGE: &str = "Something went wrong while handling this request. Please \
try again.";
const CANCELLED_MESSAGE: &str = "Okay, I've cancelled that.";
const INCOMPLETE_MESSAGE: &str = "I wasn't able to finish that request.";

/// The iterative agent loop, one instance shared across turns.
pub struct Agent<B: ModelBackend> {
    backend: Arc<B>,
    registry: Arc<dyn ToolRegistry>,
    lookup: Arc<dyn EntityLookup>,
    sink: Arc<dyn TranscriptSink>,
    sessions: Arc<dyn SessionStore>,
    policy: AgentPolicy,
}

impl<B: ModelBackend> Agent<B> {
    pub fn new(backend: Arc<B>, registry: Arc<dyn ToolRegistry>) -> Self {
        Self {
            backend,
            registry,
            lookup: Arc::new(StaticEntityLookup::new()),
            sink: Arc::new(NullTranscriptSink),
            sessions: Arc::new(MemorySessionStore::new()),
            policy: AgentPolicy::default(),
        }
    }

    pub fn with_entity_lookup(mut self, lookup: Arc<dyn EntityLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    pub fn with_transcript_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_session_store(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_policy(mut self, policy: AgentPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs one turn to completion.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, AgentError> {
        info!(
            session = request.session_id.as_deref(),
            tools = request.tool_schemas.len(),
            "Agent turn started"
        );

        if let Some(session_id) = request.session_id.clone() {
            if let Some(pending) = self.sessions.pending_critical_action(&session_id).await? {
                return self.settle_pending_confirmation(&session_id, pending, &request).await;
            }
        }

        self.drive_loop(request).await
    }

    async fn settle_pending_confirmation(
        &self,
        session_id: &str,
        pending: PendingCriticalAction,
        request: &TurnRequest,
    ) -> Result<TurnOutcome, AgentError> {
        let reply = latest_user_message(&request.messages).unwrap_or_default();
        let verdict =
            classifiers::classify_confirmation(self.backend.as_ref(), &pending, &reply).await;
        info!(
            decision = ?verdict.decision,
            confidence = ?verdict.confidence,
            tool = %pending.tool_name,
            "Pending critical action classified"
        );

        match verdict.decision {
            ConfirmDecision::Deny => {
                self.sessions.clear_pending_critical_action(session_id).await?;
                Ok(TurnOutcome {
                    text: CANCELLED_MESSAGE.to_string(),
                    needs_followup: false,
                    iterations: 0,
                    records: Vec::new(),
                })
            }
            ConfirmDecision::Confirm if verdict.confidence >= Confidence::Medium => {
                self.sessions.clear_pending_critical_action(session_id).await?;
                let call = ToolCall::new(
                    Uuid::new_v4().to_string(),
                    pending.tool_name.clone(),
                    pending.arguments.clone(),
                );
                let mut items = execute_batch(
                    self.registry.as_ref(),
                    vec![call],
                    self.policy.default_tool_max_retries,
                    self.policy.default_latency_budget_ms,
                    self.policy.search_latency_floor_ms,
                )
                .await;
                let item = items.pop().expect("batch of one yields one item");
                let text = match &item.outcome {
                    Ok(result) if !result.message.is_empty() => result.message.clone(),
                    Ok(_) => "Done.".to_string(),
                    Err(err) => err.user_message(),
                };
                Ok(TurnOutcome {
                    text,
                    needs_followup: false,
                    iterations: 0,
                    records: vec![item.record],
                })
            }
            _ => Ok(TurnOutcome {
                text: confirmation_prompt(&pending),
                needs_followup: true,
                iterations: 0,
                records: Vec::new(),
            }),
        }
    }

    async fn drive_loop(&self, request: TurnRequest) -> Result<TurnOutcome, AgentError> {
        let max_iterations = request
            .max_iterations
            .unwrap_or(self.policy.max_iterations);
        let known_tools: Vec<String> = request
            .tool_schemas
            .iter()
            .map(|schema| schema.name.clone())
            .collect();

        let mut transcript = request.messages.clone();
        let mut records = Vec::new();
        let mut iterations: u32 = 0;
        let mut last_text = String::new();
        let mut prose_retries: u32 = 0;
        let mut malformed_retries: u32 = 0;
        let mut route_checks: u32 = 0;
        let mut nudged_empty = false;
        let mut stall = StallTracker::default();

        loop {
            if iterations >= max_iterations {
                warn!(iterations, "Iteration budget exhausted; returning last seen text");
                let text = if last_text.trim().is_empty() {
                    INCOMPLETE_MESSAGE.to_string()
                } else {
                    last_text
                };
                return Ok(TurnOutcome {
                    text,
                    needs_followup: false,
                    iterations,
                    records,
                });
            }
            iterations += 1;

            let response = self.call_model(&transcript, &request, iterations == 1).await?;
            if !response.content.trim().is_empty() {
                last_text = response.content.clone();
            }

            let calls = response.tool_calls.clone();

            if calls.is_empty() {
                // Tool call written as prose.
                if heuristics::looks_like_prose_tool_call(&response.content, &known_tools) {
                    if prose_retries < self.policy.max_prose_retries {
                        prose_retries += 1;
                        debug!("Tool call written as prose; injecting corrective instruction");
                        transcript.push(Message::assistant(response.content));
                        transcript.push(Message::system(PROSE_TOOL_CALL_NUDGE));
                        continue;
                    }
                    warn!("Prose tool-call retries exhausted; asking user to rephrase");
                    return Ok(TurnOutcome {
                        text: CLARIFICATION_FALLBACK.to_string(),
                        needs_followup: true,
                        iterations,
                        records,
                    });
                }

                // Nothing at all on the first iteration gets one nudge.
                if response.content.trim().is_empty() && iterations == 1 && !nudged_empty {
                    nudged_empty = true;
                    transcript.push(Message::system(EMPTY_RESPONSE_NUDGE));
                    continue;
                }

                // Did the model silently skip an action it should have taken?
                if route_checks < self.policy.max_route_checks {
                    route_checks += 1;
                    let user_text = latest_user_message(&transcript).unwrap_or_default();
                    let verdict = classifiers::classify_missing_route(
                        self.backend.as_ref(),
                        &user_text,
                        &response.content,
                    )
                    .await;
                    if verdict.needs_retry && verdict.route != Route::None {
                        let evidence = if heuristics::mentions_relative_offset(&user_text) {
                            let kind = match verdict.route {
                                Route::Alarm => EventKind::Alarm,
                                Route::Timer => EventKind::Timer,
                                Route::None => unreachable!("filtered above"),
                            };
                            self.lookup.recent_event(kind).await
                        } else {
                            true
                        };
                        if evidence {
                            info!(route = ?verdict.route, "Tool-less reply to an action intent; nudging");
                            transcript.push(Message::assistant(response.content));
                            transcript.push(Message::system(MISSING_ROUTE_NUDGE));
                            continue;
                        }
                        debug!(route = ?verdict.route, "No recent event backs the relative action; accepting text");
                    }
                }

                return Ok(TurnOutcome {
                    text: response.content,
                    needs_followup: false,
                    iterations,
                    records,
                });
            }

            // Malformed arguments get a bounded number of corrective retries.
            if calls.iter().any(ToolCall::is_malformed) {
                if malformed_retries < self.policy.max_malformed_retries {
                    malformed_retries += 1;
                    debug!(attempt = malformed_retries, "Malformed tool call; requesting a retry");
                    transcript.push(Message::assistant(response.content));
                    transcript.push(Message::system(MALFORMED_CALL_NUDGE));
                    continue;
                }
                warn!("Malformed tool-call retries exhausted; asking user to rephrase");
                return Ok(TurnOutcome {
                    text: CLARIFICATION_FALLBACK.to_string(),
                    needs_followup: true,
                    iterations,
                    records,
                });
            }

            // Cancel/abort sentinel completes the turn, dropping siblings.
            if let Some(cancel) = calls
                .iter()
                .find(|call| ToolKind::classify(&call.name) == ToolKind::Nevermind)
            {
                if calls.len() > 1 {
                    warn!(discarded = calls.len() - 1, "Cancel signal discards sibling calls");
                }
                let text =
                    sentinel_message(cancel).unwrap_or_else(|| CANCELLED_MESSAGE.to_string());
                return Ok(TurnOutcome {
                    text,
                    needs_followup: false,
                    iterations,
                    records,
                });
            }

            // Await-clarification sentinel ends the turn when it stands alone.
            let (sentinels, executable): (Vec<ToolCall>, Vec<ToolCall>) = calls
                .into_iter()
                .partition(|call| ToolKind::classify(&call.name) == ToolKind::AwaitResponse);
            if !sentinels.is_empty() && executable.is_empty() {
                if let Some(session_id) = request.session_id.as_deref() {
                    let consecutive = self.sessions.increment_followups(session_id).await?;
                    if consecutive > self.policy.max_consecutive_followups {
                        warn!(consecutive, "Consecutive clarification limit exceeded; aborting turn");
                        self.sessions.reset_followups(session_id).await?;
                        return Ok(TurnOutcome {
                            text: FOLLOWUP_LIMIT_MESSAGE.to_string(),
                            needs_followup: false,
                            iterations,
                            records,
                        });
                    }
                }
                let text = sentinel_message(&sentinels[0])
                    .unwrap_or_else(|| CLARIFICATION_FALLBACK.to_string());
                return Ok(TurnOutcome {
                    text,
                    needs_followup: true,
                    iterations,
                    records,
                });
            }
            if !sentinels.is_empty() {
                debug!("Ignoring await-clarification signal issued alongside executable calls");
            }

            // Conflict and default-target normalization.
            let executable =
                conflict::normalize_control_calls(executable, self.lookup.as_ref()).await;

            // Critical actions never execute in the turn that proposed them.
            if let Some((call, domains)) = self.find_critical(&executable) {
                let pending = PendingCriticalAction::new(
                    call.name.clone(),
                    call.arguments.clone(),
                    iterations,
                    domains,
                );
                let prompt = confirmation_prompt(&pending);
                info!(tool = %call.name, "Critical action deferred pending confirmation");
                match request.session_id.as_deref() {
                    Some(session_id) => {
                        self.sessions
                            .set_pending_critical_action(session_id, pending)
                            .await?;
                    }
                    None => warn!(
                        "Critical action intercepted without a session; confirmation cannot be resumed"
                    ),
                }
                return Ok(TurnOutcome {
                    text: prompt,
                    needs_followup: true,
                    iterations,
                    records,
                });
            }

            // Execute the batch and feed results back to the model.
            transcript.push(Message::assistant_with_calls(
                response.content.clone(),
                executable.clone(),
            ));
            let items = execute_batch(
                self.registry.as_ref(),
                executable,
                self.policy.default_tool_max_retries,
                self.policy.default_latency_budget_ms,
                self.policy.search_latency_floor_ms,
            )
            .await;

            stall.observe_batch(&items);
            let mut any_success = false;
            for item in items {
                if item.succeeded() {
                    any_success = true;
                }
                let content = match &item.outcome {
                    Ok(result) => serde_json::to_string(result)
                        .unwrap_or_else(|_| result.message.clone()),
                    Err(err) => serde_json::to_string(&ToolResult::error(err.user_message()))
                        .unwrap_or_else(|_| err.user_message()),
                };
                transcript.push(Message::tool_result(
                    item.call.id.clone(),
                    item.call.name.clone(),
                    content,
                ));
                records.push(item.record);
            }

            if any_success {
                if let Some(session_id) = request.session_id.as_deref() {
                    self.sessions.reset_followups(session_id).await?;
                }
            }

            if stall.stalled(self.policy.stall_failure_threshold) {
                warn!("Search tool stalled on missing queries; forcing an evidence-only answer");
                return self
                    .forced_evidence_answer(transcript, &request, iterations, records, last_text)
                    .await;
            }
        }
    }

    /// First iteration streams so the host surface renders output as it
    /// arrives; after any tool execution, blocking calls keep each turn
    /// segment a single continuous stream. Streaming setup failure falls
    /// back to the blocking path within the same iteration.
    async fn call_model(
        &self,
        transcript: &[Message],
        request: &TurnRequest,
        streaming: bool,
    ) -> Result<ModelResponse, AgentError> {
        let model_request = ModelRequest::new(transcript.to_vec())
            .with_tools(request.tool_schemas.clone())
            .with_cached_prefix_length(request.cached_prefix_length);

        if streaming {
            match self.backend.chat_stream(model_request.clone()).await {
                Ok(stream) => return Ok(self.collect_stream(stream).await?),
                Err(err) => {
                    debug!(error = %err, "Streaming unavailable; falling back to blocking call");
                }
            }
        }

        Ok(self.backend.chat(model_request).await?)
    }

    async fn collect_stream(&self, mut stream: DeltaStream) -> Result<ModelResponse, ModelError> {
        self.push_delta(TranscriptDelta::Role(MessageRole::Assistant)).await;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let Some(text) = delta.content {
                self.push_delta(TranscriptDelta::Content(text.clone())).await;
                content.push_str(&text);
            }
            if !delta.tool_calls.is_empty() {
                self.push_delta(TranscriptDelta::ToolCalls(delta.tool_calls.clone())).await;
                tool_calls.extend(delta.tool_calls);
            }
        }

        Ok(ModelResponse {
            content,
            tool_calls,
        })
    }

    async fn push_delta(&self, delta: TranscriptDelta) {
        if let Err(err) = self.sink.push(delta).await {
            warn!(error = %err, "Transcript sink rejected delta");
        }
    }

    /// One additional model call constrained to already-collected evidence,
    /// with tools withheld. Converts a search retry loop into a bounded
    /// best-effort answer.
    async fn forced_evidence_answer(
        &self,
        mut transcript: Vec<Message>,
        request: &TurnRequest,
        iterations: u32,
        records: Vec<crate::domain::types::ToolCallRecord>,
        last_text: String,
    ) -> Result<TurnOutcome, AgentError> {
        transcript.push(Message::system(EVIDENCE_ONLY_NUDGE));
        let model_request = ModelRequest::new(transcript)
            .with_cached_prefix_length(request.cached_prefix_length);
        let response = self.backend.chat(model_request).await?;

        let text = if response.content.trim().is_empty() {
            if last_text.trim().is_empty() {
                INCOMPLETE_MESSAGE.to_string()
            } else {
                last_text
            }
        } else {
            response.content
        };
        Ok(TurnOutcome {
            text,
            needs_followup: false,
            iterations: iterations + 1,
            records,
        })
    }

    fn find_critical<'a>(&self, calls: &'a [ToolCall]) -> Option<(&'a ToolCall, BTreeSet<String>)> {
        for call in calls {
            if ToolKind::classify(&call.name) != ToolKind::Control {
                continue;
            }
            let domains: BTreeSet<String> = conflict::control_targets(&call.arguments)
                .iter()
                .map(|target| conflict::entity_domain(target).to_string())
                .collect();
            if domains.iter().any(|d| self.policy.is_critical_domain(d)) {
                return Some((call, domains));
            }
        }
        None
    }
}

fn confirmation_prompt(pending: &PendingCriticalAction) -> String {
    format!(
        "This needs your confirmation: {}. Should I go ahead?",
        pending.describe()
    )
}

fn sentinel_message(call: &ToolCall) -> Option<String> {
    call.arguments
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

fn latest_user_message(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == MessageRole::User)
        .map(|message| message.content.clone())
}

/// Tracks structural "missing query" failures on search-class tools.
///
/// Distinguishes them from zero-result failures: only the structural kind
/// indicates the model is stuck re-issuing unusable calls.
#[derive(Debug, Default)]
struct StallTracker {
    had_success: bool,
    consecutive_missing_query: u32,
}

impl StallTracker {
    fn observe_batch(&mut self, items: &[BatchItem]) {
        let mut saw_search = false;
        let mut search_success = false;
        let mut missing_query = false;

        for item in items {
            if !ToolKind::classify(&item.call.name).is_search() {
                continue;
            }
            saw_search = true;
            match &item.outcome {
                Ok(result) if result.success => search_success = true,
                Ok(result) if is_missing_query_failure(result) => missing_query = true,
                _ => {}
            }
        }

        if !saw_search {
            return;
        }
        if search_success {
            self.had_success = true;
            self.consecutive_missing_query = 0;
        } else if missing_query {
            self.consecutive_missing_query += 1;
        } else {
            self.consecutive_missing_query = 0;
        }
    }

    fn stalled(&self, threshold: u32) -> bool {
        self.had_success && self.consecutive_missing_query >= threshold
    }
}

fn is_missing_query_failure(result: &ToolResult) -> bool {
    if result.success {
        return false;
    }
    result
        .data
        .get("error")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|code| code == "missing_query")
        || result.message.to_lowercase().contains("missing query")
}
