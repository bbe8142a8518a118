use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use orrery_session::{MemorySessionStore, SessionStore};

use super::models::{TurnOutcome, TurnRequest};
use super::runner::Agent;
use crate::application::tooling::{EventKind, StaticEntityLookup, ToolError, ToolRegistry};
use crate::application::transcript::{SinkError, TranscriptDelta, TranscriptSink};
use crate::config::AgentPolicy;
use crate::domain::types::{Message, MessageRole, ToolCall, ToolResult, ToolSchema};
use crate::infrastructure::model::{
    DeltaStream, ModelBackend, ModelError, ModelRequest, ModelResponse, ResponseDelta,
};

struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<ModelResponse, ModelError>>>,
    streams: Mutex<VecDeque<Vec<ResponseDelta>>>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
    stream_attempts: Mutex<u32>,
}

impl ScriptedBackend {
    fn new(responses: Vec<Result<ModelResponse, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            streams: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            stream_attempts: Mutex::new(0),
        }
    }

    fn with_stream(self, deltas: Vec<ResponseDelta>) -> Self {
        self.streams
            .try_lock()
            .expect("stream script set before the agent runs")
            .push_back(deltas);
        self
    }

    async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }

    async fn chat_calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn stream_attempts(&self) -> u32 {
        *self.stream_attempts.lock().await
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn chat(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::request("script exhausted")))
    }

    async fn chat_stream(&self, request: ModelRequest) -> Result<DeltaStream, ModelError> {
        *self.stream_attempts.lock().await += 1;
        let Some(deltas) = self.streams.lock().await.pop_front() else {
            return Err(ModelError::StreamingUnsupported);
        };
        self.requests.lock().await.push(request);
        Ok(Box::pin(futures::stream::iter(
            deltas.into_iter().map(Ok),
        )))
    }
}

#[derive(Default)]
struct RecordingRegistry {
    invocations: Arc<Mutex<Vec<(String, Map<String, Value>)>>>,
    scripted: Mutex<VecDeque<Result<ToolResult, ToolError>>>,
}

impl RecordingRegistry {
    fn scripted(results: Vec<Result<ToolResult, ToolError>>) -> Self {
        Self {
            scripted: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    async fn invocations(&self) -> Vec<(String, Map<String, Value>)> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl ToolRegistry for RecordingRegistry {
    async fn execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        _max_retries: u32,
        _latency_budget_ms: u64,
    ) -> Result<ToolResult, ToolError> {
        self.invocations
            .lock()
            .await
            .push((name.to_string(), arguments.clone()));
        self.scripted
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok(ToolResult::ok("done")))
    }

    fn has_tool(&self, _name: &str) -> bool {
        true
    }
}

#[derive(Default)]
struct CollectingSink {
    deltas: Mutex<Vec<TranscriptDelta>>,
}

#[async_trait]
impl TranscriptSink for CollectingSink {
    async fn push(&self, delta: TranscriptDelta) -> Result<(), SinkError> {
        self.deltas.lock().await.push(delta);
        Ok(())
    }
}

fn text_response(text: &str) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse::text(text))
}

fn calls_response(text: &str, calls: Vec<ToolCall>) -> Result<ModelResponse, ModelError> {
    Ok(ModelResponse::text(text).with_tool_calls(calls))
}

fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    let arguments = arguments
        .as_object()
        .cloned()
        .unwrap_or_default();
    ToolCall::new(id, name, arguments)
}

fn control_call(id: &str, targets: Value, command: &str) -> ToolCall {
    tool_call(id, "control", json!({"targets": targets, "command": command}))
}

fn route_none() -> Result<ModelResponse, ModelError> {
    text_response(r#"{"route": "none", "needs_retry": false, "confidence": "high"}"#)
}

fn schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new("control").with_description("Operate an entity"),
        ToolSchema::new("weather"),
        ToolSchema::new("web_search"),
    ]
}

fn no_route_policy() -> AgentPolicy {
    AgentPolicy {
        max_route_checks: 0,
        ..AgentPolicy::default()
    }
}

fn request(prompt: &str) -> TurnRequest {
    TurnRequest::new(vec![Message::user(prompt)]).with_tool_schemas(schemas())
}

async fn run(
    backend: Arc<ScriptedBackend>,
    registry: Arc<RecordingRegistry>,
    policy: AgentPolicy,
    turn: TurnRequest,
) -> TurnOutcome {
    Agent::new(backend, registry)
        .with_policy(policy)
        .run_turn(turn)
        .await
        .expect("turn succeeds")
}

#[tokio::test]
async fn text_only_response_is_final() {
    let backend = Arc::new(ScriptedBackend::new(vec![text_response("All lights are off.")]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry.clone(),
        no_route_policy(),
        request("are the lights off?"),
    )
    .await;

    assert_eq!(outcome.text, "All lights are off.");
    assert!(!outcome.needs_followup);
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.records.is_empty());
    assert!(registry.invocations().await.is_empty());
}

#[tokio::test]
async fn tool_results_are_fed_back_in_call_order() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response(
            "",
            vec![
                tool_call("c1", "weather", json!({"city": "Oslo"})),
                tool_call("c2", "weather", json!({"city": "Bergen"})),
            ],
        ),
        text_response("Rain in both."),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        no_route_policy(),
        request("weather in Oslo and Bergen"),
    )
    .await;

    assert_eq!(outcome.text, "Rain in both.");
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.records.len(), 2);
    assert!(outcome.records[0].arguments_summary.contains("Oslo"));

    let requests = backend.requests().await;
    let second = &requests[1];
    let tool_messages: Vec<&Message> = second
        .messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("c2"));
}

#[tokio::test]
async fn prose_tool_call_gets_one_corrective_retry() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response("I will now run control({\"targets\": [\"light.kitchen\"]})"),
        text_response("The kitchen light is on."),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        no_route_policy(),
        request("turn on the kitchen light"),
    )
    .await;

    assert_eq!(outcome.text, "The kitchen light is on.");
    assert_eq!(outcome.iterations, 2);

    let requests = backend.requests().await;
    let last = requests[1].messages.last().expect("corrective message");
    assert_eq!(last.role, MessageRole::System);
}

#[tokio::test]
async fn repeated_prose_tool_call_yields_clarification() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response("Running control({\"targets\": [\"light.kitchen\"]})"),
        text_response("Sure: control({\"targets\": [\"light.kitchen\"]})"),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        no_route_policy(),
        request("turn on the kitchen light"),
    )
    .await;

    assert!(outcome.needs_followup);
    assert_eq!(backend.chat_calls().await, 2);
}

#[tokio::test]
async fn empty_first_response_gets_one_nudge() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response(""),
        text_response("Here you go."),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        no_route_policy(),
        request("hello"),
    )
    .await;

    assert_eq!(outcome.text, "Here you go.");
    assert_eq!(outcome.iterations, 2);
}

#[tokio::test]
async fn malformed_calls_retry_twice_then_ask_to_rephrase() {
    let malformed = || calls_response("", vec![ToolCall::malformed("m1", "control")]);
    let backend = Arc::new(ScriptedBackend::new(vec![
        malformed(),
        malformed(),
        malformed(),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry.clone(),
        no_route_policy(),
        request("do the thing"),
    )
    .await;

    assert!(outcome.needs_followup);
    assert_eq!(outcome.iterations, 3);
    // Two corrective retries, then the clarification. Never a fourth call.
    assert_eq!(backend.chat_calls().await, 3);
    assert!(registry.invocations().await.is_empty());
    assert!(outcome.records.is_empty());
}

#[tokio::test]
async fn await_response_ends_turn_with_its_message() {
    let backend = Arc::new(ScriptedBackend::new(vec![calls_response(
        "",
        vec![tool_call(
            "s1",
            "await_response",
            json!({"message": "Which room did you mean?"}),
        )],
    )]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend,
        registry.clone(),
        no_route_policy(),
        request("turn on the light"),
    )
    .await;

    assert_eq!(outcome.text, "Which room did you mean?");
    assert!(outcome.needs_followup);
    assert!(registry.invocations().await.is_empty());
}

#[tokio::test]
async fn nevermind_discards_sibling_calls() {
    let backend = Arc::new(ScriptedBackend::new(vec![calls_response(
        "",
        vec![
            tool_call("c1", "weather", json!({"city": "Oslo"})),
            tool_call("s1", "nevermind", json!({"message": "Never mind, then."})),
        ],
    )]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend,
        registry.clone(),
        no_route_policy(),
        request("actually forget it"),
    )
    .await;

    assert_eq!(outcome.text, "Never mind, then.");
    assert!(!outcome.needs_followup);
    assert!(registry.invocations().await.is_empty());
}

#[tokio::test]
async fn await_response_alongside_real_calls_is_ignored() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response(
            "",
            vec![
                tool_call("c1", "weather", json!({"city": "Oslo"})),
                tool_call("s1", "await_response", json!({"message": "hold on"})),
            ],
        ),
        text_response("Rainy."),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend,
        registry.clone(),
        no_route_policy(),
        request("weather in Oslo"),
    )
    .await;

    assert_eq!(outcome.text, "Rainy.");
    let invocations = registry.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, "weather");
}

#[tokio::test]
async fn critical_control_is_never_executed_in_its_own_turn() {
    let backend = Arc::new(ScriptedBackend::new(vec![calls_response(
        "",
        vec![control_call("c1", json!(["lock.front_door"]), "unlock")],
    )]));
    let registry = Arc::new(RecordingRegistry::default());
    let sessions: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());

    let agent = Agent::new(backend, registry.clone())
        .with_policy(no_route_policy())
        .with_session_store(sessions.clone());
    let outcome = agent
        .run_turn(request("unlock the front door").with_session_id("s1"))
        .await
        .expect("turn succeeds");

    assert!(outcome.needs_followup);
    assert!(outcome.text.contains("lock.front_door"));
    assert!(registry.invocations().await.is_empty());
    assert!(outcome.records.is_empty());

    let pending = sessions
        .pending_critical_action("s1")
        .await
        .expect("store reachable")
        .expect("pending stored");
    assert_eq!(pending.tool_name, "control");
    assert!(pending.target_domains.contains("lock"));
}

#[tokio::test]
async fn confirmed_critical_action_executes_directly() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        // Turn 1: the model proposes the critical action.
        calls_response("", vec![control_call("c1", json!(["lock.front_door"]), "unlock")]),
        // Turn 2: only the confirmation classifier runs.
        text_response(r#"{"decision": "confirm", "confidence": "high"}"#),
    ]));
    let registry = Arc::new(RecordingRegistry::scripted(vec![Ok(ToolResult::ok(
        "Front door unlocked",
    ))]));
    let sessions: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());

    let agent = Agent::new(backend.clone(), registry.clone())
        .with_policy(no_route_policy())
        .with_session_store(sessions.clone());

    let first = agent
        .run_turn(request("unlock the front door").with_session_id("s1"))
        .await
        .expect("first turn");
    assert!(first.needs_followup);

    let second = agent
        .run_turn(
            TurnRequest::new(vec![
                Message::user("unlock the front door"),
                Message::assistant(first.text.clone()),
                Message::user("yes, go ahead"),
            ])
            .with_tool_schemas(schemas())
            .with_session_id("s1"),
        )
        .await
        .expect("second turn");

    assert_eq!(second.text, "Front door unlocked");
    assert!(!second.needs_followup);
    assert_eq!(second.iterations, 0);
    assert_eq!(second.records.len(), 1);

    let invocations = registry.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].0, "control");

    assert!(
        sessions
            .pending_critical_action("s1")
            .await
            .expect("store reachable")
            .is_none()
    );
}

#[tokio::test]
async fn denied_critical_action_is_cancelled() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response("", vec![control_call("c1", json!(["lock.front_door"]), "unlock")]),
        text_response(r#"{"decision": "deny", "confidence": "high"}"#),
    ]));
    let registry = Arc::new(RecordingRegistry::default());
    let sessions: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());

    let agent = Agent::new(backend, registry.clone())
        .with_policy(no_route_policy())
        .with_session_store(sessions.clone());

    agent
        .run_turn(request("unlock the front door").with_session_id("s1"))
        .await
        .expect("first turn");
    let second = agent
        .run_turn(
            TurnRequest::new(vec![Message::user("no, don't")])
                .with_tool_schemas(schemas())
                .with_session_id("s1"),
        )
        .await
        .expect("second turn");

    assert!(!second.needs_followup);
    assert!(registry.invocations().await.is_empty());
    assert!(
        sessions
            .pending_critical_action("s1")
            .await
            .expect("store reachable")
            .is_none()
    );
}

#[tokio::test]
async fn unclear_confirmation_reprompts_and_keeps_pending() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response("", vec![control_call("c1", json!(["lock.front_door"]), "unlock")]),
        text_response(r#"{"decision": "unclear", "confidence": "low"}"#),
    ]));
    let registry = Arc::new(RecordingRegistry::default());
    let sessions: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());

    let agent = Agent::new(backend, registry.clone())
        .with_policy(no_route_policy())
        .with_session_store(sessions.clone());

    agent
        .run_turn(request("unlock the front door").with_session_id("s1"))
        .await
        .expect("first turn");
    let second = agent
        .run_turn(
            TurnRequest::new(vec![Message::user("what?")])
                .with_tool_schemas(schemas())
                .with_session_id("s1"),
        )
        .await
        .expect("second turn");

    assert!(second.needs_followup);
    assert!(second.text.contains("lock.front_door"));
    assert!(registry.invocations().await.is_empty());
    assert!(
        sessions
            .pending_critical_action("s1")
            .await
            .expect("store reachable")
            .is_some()
    );
}

#[tokio::test]
async fn low_confidence_confirm_reprompts() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response("", vec![control_call("c1", json!(["lock.front_door"]), "unlock")]),
        text_response(r#"{"decision": "confirm", "confidence": "low"}"#),
    ]));
    let registry = Arc::new(RecordingRegistry::default());
    let sessions: Arc<MemorySessionStore> = Arc::new(MemorySessionStore::new());

    let agent = Agent::new(backend, registry.clone())
        .with_policy(no_route_policy())
        .with_session_store(sessions.clone());

    agent
        .run_turn(request("unlock the front door").with_session_id("s1"))
        .await
        .expect("first turn");
    let second = agent
        .run_turn(
            TurnRequest::new(vec![Message::user("uh, sure I guess?")])
                .with_tool_schemas(schemas())
                .with_session_id("s1"),
        )
        .await
        .expect("second turn");

    assert!(second.needs_followup);
    assert!(registry.invocations().await.is_empty());
}

#[tokio::test]
async fn same_target_control_calls_keep_only_the_last() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response(
            "",
            vec![
                control_call("c1", json!(["light.kitchen"]), "turn_on"),
                control_call("c2", json!(["light.kitchen"]), "turn_off"),
            ],
        ),
        text_response("Kitchen light is off."),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend,
        registry.clone(),
        no_route_policy(),
        request("kitchen light on... no, off"),
    )
    .await;

    assert_eq!(outcome.records.len(), 1);
    let invocations = registry.invocations().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].1.get("command"), Some(&json!("turn_off")));
}

#[tokio::test]
async fn implicit_multi_target_collapses_to_the_group() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        calls_response(
            "",
            vec![control_call(
                "c1",
                json!(["light.sofa_lamp", "light.living_room", "light.ceiling"]),
                "turn_on",
            )],
        ),
        text_response("Living room lights on."),
    ]));
    let registry = Arc::new(RecordingRegistry::default());
    let lookup = Arc::new(StaticEntityLookup::new().with_group("light.living_room"));

    let outcome = Agent::new(backend, registry.clone())
        .with_policy(no_route_policy())
        .with_entity_lookup(lookup)
        .run_turn(request("turn on the living room lights"))
        .await
        .expect("turn succeeds");

    assert_eq!(outcome.records.len(), 1);
    let invocations = registry.invocations().await;
    assert_eq!(
        invocations[0].1.get("targets"),
        Some(&json!(["light.living_room"]))
    );
}

#[tokio::test]
async fn accepted_text_consults_route_classifier_once() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response("It is 10:00."),
        route_none(),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        AgentPolicy::default(),
        request("what time is it?"),
    )
    .await;

    assert_eq!(outcome.text, "It is 10:00.");
    assert_eq!(outcome.iterations, 1);
    // One loop call plus one classifier call.
    assert_eq!(backend.chat_calls().await, 2);
}

#[tokio::test]
async fn skipped_action_gets_a_directive_nudge() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response("Okay, alarm set for 7am."),
        text_response(r#"{"route": "alarm", "needs_retry": true, "confidence": "high"}"#),
        calls_response("", vec![tool_call("c1", "set_alarm", json!({"time": "07:00"}))]),
        text_response("Alarm set for 7am."),
        route_none(),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry.clone(),
        AgentPolicy::default(),
        request("set an alarm for 7am"),
    )
    .await;

    assert_eq!(outcome.text, "Alarm set for 7am.");
    assert_eq!(registry.invocations().await.len(), 1);
}

#[tokio::test]
async fn relative_action_without_recent_event_is_not_nudged() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response("Added five more minutes."),
        text_response(r#"{"route": "timer", "needs_retry": true, "confidence": "high"}"#),
    ]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry.clone(),
        AgentPolicy::default(),
        request("add five more minutes"),
    )
    .await;

    // No recent timer event backs the relative request: accept the text.
    assert_eq!(outcome.text, "Added five more minutes.");
    assert_eq!(backend.chat_calls().await, 2);
    assert!(registry.invocations().await.is_empty());
}

#[tokio::test]
async fn relative_action_with_recent_event_is_nudged() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        text_response("Added five more minutes."),
        text_response(r#"{"route": "timer", "needs_retry": true, "confidence": "high"}"#),
        calls_response("", vec![tool_call("c1", "extend_timer", json!({"seconds": 300}))]),
        text_response("Five minutes added."),
        route_none(),
    ]));
    let registry = Arc::new(RecordingRegistry::default());
    let lookup = Arc::new(StaticEntityLookup::new().with_recent_event(EventKind::Timer));

    let outcome = Agent::new(backend, registry.clone())
        .with_entity_lookup(lookup)
        .run_turn(request("add five more minutes"))
        .await
        .expect("turn succeeds");

    assert_eq!(outcome.text, "Five minutes added.");
    assert_eq!(registry.invocations().await.len(), 1);
}

#[tokio::test]
async fn first_iteration_streams_and_forwards_deltas() {
    let backend = ScriptedBackend::new(vec![]).with_stream(vec![
        ResponseDelta {
            content: Some("All ".into()),
            tool_calls: Vec::new(),
        },
        ResponseDelta {
            content: Some("good.".into()),
            tool_calls: Vec::new(),
        },
    ]);
    let backend = Arc::new(backend);
    let registry = Arc::new(RecordingRegistry::default());
    let sink = Arc::new(CollectingSink::default());

    let outcome = Agent::new(backend.clone(), registry)
        .with_policy(no_route_policy())
        .with_transcript_sink(sink.clone())
        .run_turn(request("status?"))
        .await
        .expect("turn succeeds");

    assert_eq!(outcome.text, "All good.");
    assert_eq!(backend.stream_attempts().await, 1);

    let deltas = sink.deltas.lock().await;
    assert_eq!(deltas[0], TranscriptDelta::Role(MessageRole::Assistant));
    assert_eq!(deltas[1], TranscriptDelta::Content("All ".into()));
    assert_eq!(deltas[2], TranscriptDelta::Content("good.".into()));
}

#[tokio::test]
async fn streaming_setup_failure_falls_back_to_blocking() {
    // No stream scripted: chat_stream reports unsupported.
    let backend = Arc::new(ScriptedBackend::new(vec![text_response("Fallback answer.")]));
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        no_route_policy(),
        request("status?"),
    )
    .await;

    assert_eq!(outcome.text, "Fallback answer.");
    assert_eq!(outcome.iterations, 1);
    assert_eq!(backend.stream_attempts().await, 1);
    assert_eq!(backend.chat_calls().await, 1);
}

#[tokio::test]
async fn later_iterations_do_not_stream() {
    let backend = ScriptedBackend::new(vec![
        calls_response("", vec![tool_call("c1", "weather", json!({"city": "Oslo"}))]),
        text_response("Rainy."),
    ]);
    let backend = Arc::new(backend);
    let registry = Arc::new(RecordingRegistry::default());

    let outcome = run(
        backend.clone(),
        registry,
        no_route_policy(),
        request("weather in Oslo"),
    )
    .await;

    assert_eq!(outcome.text, "Rainy.");
    // Streaming attempted only for the first iteration.
    assert_eq!(backend.stream_attempts().await, 1);
}
