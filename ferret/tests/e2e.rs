//! End-to-end scenarios through the full stack: executor + registry +
//! scripted chat sessions.

use async_trait::async_trait;
use ferret::{
    builtin, forward_activity, invoke_sub_agent, ActivityEvent, ActivityKind, AgentDefinition,
    AgentError, AgentInputs, ChatChunk, ChatFactory, ChatSession, ChatStream, FinishReason,
    FnTool, HostContext, InputSpec, InterruptManager, ModelConfig, OutputChunkHandler,
    OutputSpec, Part, RegisteredTool, RetryPolicy, SamplingParams, SessionOptions, SteeringSlot,
    TelemetryRecord, TelemetrySink, TerminationReason, TestChatFactory, ToolDeclaration,
    ToolError, ToolExecOutcome, ToolInvocation, ToolRegistry, COMPLETE_TASK_TOOL,
};
use ferret_core::executor::AgentExecutor;
use ferret_core::host::{EnvironmentContext, ToolDispatch};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct FixedEnv;

impl EnvironmentContext for FixedEnv {
    fn context_block(&self, _model: &str) -> String {
        "# Environment Context\nWorking directory: /work".to_string()
    }
}

#[derive(Default)]
struct Recorder {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl Recorder {
    fn finish(&self) -> Option<(u32, TerminationReason)> {
        self.records.lock().unwrap().iter().find_map(|r| match r {
            TelemetryRecord::AgentFinish { turns, reason, .. } => Some((*turns, *reason)),
            _ => None,
        })
    }

    fn recovery(&self) -> Option<(TerminationReason, bool)> {
        self.records.lock().unwrap().iter().find_map(|r| match r {
            TelemetryRecord::RecoveryAttempt { reason, success, .. } => Some((*reason, *success)),
            _ => None,
        })
    }
}

impl TelemetrySink for Recorder {
    fn record(&self, record: TelemetryRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn shell_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(FnTool::new(builtin::shell(), |args| {
        Ok(Value::String(format!(
            "ran: {}",
            args.get("command").and_then(Value::as_str).unwrap_or("")
        )))
    }));
    registry.register(FnTool::new(builtin::grep(), |_| {
        Ok(Value::String("no matches".to_string()))
    }));
    Arc::new(registry)
}

fn call(name: &str, call_id: &str, args: Value) -> ChatChunk {
    let args = match args {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ChatChunk::function_call(ToolInvocation::new(call_id, name, args))
}

fn completion(call_id: &str, args: Value) -> ChatChunk {
    call(COMPLETE_TASK_TOOL, call_id, args)
}

fn finish() -> ChatChunk {
    ChatChunk::finish(FinishReason::Stop)
}

fn remote_model() -> ModelConfig {
    ModelConfig::Remote {
        model: "large".to_string(),
        params: SamplingParams::default(),
    }
}

struct Harness {
    host: HostContext,
    telemetry: Arc<Recorder>,
    interrupts: Arc<InterruptManager>,
    steering: Arc<SteeringSlot>,
    chat: Arc<TestChatFactory>,
}

fn harness(script: Vec<Vec<ChatChunk>>) -> Harness {
    harness_with_registry(script, shell_registry())
}

fn harness_with_registry(script: Vec<Vec<ChatChunk>>, registry: Arc<ToolRegistry>) -> Harness {
    let chat = TestChatFactory::single(script);
    let telemetry = Arc::new(Recorder::default());
    let interrupts = Arc::new(InterruptManager::new());
    let steering = SteeringSlot::new();
    let host = HostContext::new(
        registry as Arc<dyn ToolDispatch>,
        Arc::clone(&chat) as Arc<dyn ChatFactory>,
        Arc::new(FixedEnv),
    )
    .with_telemetry(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>)
    .with_interrupts(Arc::clone(&interrupts))
    .with_steering(Arc::clone(&steering))
    .with_retry(RetryPolicy::none());
    Harness {
        host,
        telemetry,
        interrupts,
        steering,
        chat,
    }
}

async fn run_agent(
    harness: &Harness,
    definition: AgentDefinition,
    inputs: AgentInputs,
) -> (ferret::AgentOutcome, Vec<ActivityEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    harness.interrupts.start_agent_session();
    let mut executor =
        AgentExecutor::new(Arc::new(definition), harness.host.clone(), Some(tx)).unwrap();
    let outcome = executor.run(inputs, CancellationToken::new()).await.unwrap();
    harness.interrupts.end_agent_session();
    drop(executor);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

// Scenario: happy path, no output schema.
#[tokio::test]
async fn shell_then_complete() {
    let harness = harness(vec![
        vec![
            call("shell", "c1", serde_json::json!({"command": "echo hi"})),
            finish(),
        ],
        vec![completion("c2", serde_json::json!({})), finish()],
    ]);
    let definition = AgentDefinition::builder("greeter")
        .description("says hello")
        .model(remote_model())
        .system_prompt("Say hello using the shell.")
        .tool_named("shell")
        .build();

    let (outcome, events) = run_agent(&harness, definition, AgentInputs::new()).await;

    assert_eq!(outcome.reason, TerminationReason::Goal);
    assert_eq!(outcome.result, "Task completed successfully.");

    let types: Vec<&str> = events
        .iter()
        .map(|e| ferret::activity::activity_kind_type(&e.kind))
        .collect();
    assert!(types.contains(&"tool_call_start"));
    assert!(types.contains(&"tool_call_end"));
    assert!(events.iter().all(|e| e.is_subagent_activity));
    assert!(events.iter().all(|e| e.agent_name == "greeter"));

    let (turns, reason) = harness.telemetry.finish().unwrap();
    assert_eq!(turns, 2);
    assert_eq!(reason, TerminationReason::Goal);
}

// Scenario: happy path, structured output.
#[tokio::test]
async fn structured_output_is_rendered_as_json() {
    let harness = harness(vec![vec![
        completion("c1", serde_json::json!({"Response": "done"})),
        finish(),
    ]]);
    let definition = AgentDefinition::builder("extractor")
        .model(remote_model())
        .system_prompt("Extract.")
        .output(OutputSpec::new(
            "Response",
            "the answer",
            serde_json::json!({"type": "string"}),
        ))
        .build();

    let (outcome, _) = run_agent(&harness, definition, AgentInputs::new()).await;
    assert_eq!(outcome.reason, TerminationReason::Goal);
    assert_eq!(
        outcome.result,
        serde_json::to_string_pretty(&serde_json::json!({"Response": "done"})).unwrap()
    );
}

// Scenario: validation failure then success.
#[tokio::test]
async fn invalid_output_retries_then_succeeds() {
    let harness = harness(vec![
        vec![completion("c1", serde_json::json!({"Response": 7})), finish()],
        vec![
            completion("c2", serde_json::json!({"Response": "ok"})),
            finish(),
        ],
    ]);
    let definition = AgentDefinition::builder("extractor")
        .model(remote_model())
        .system_prompt("Extract.")
        .output(OutputSpec::new(
            "Response",
            "the answer",
            serde_json::json!({"type": "string"}),
        ))
        .build();

    let (outcome, _) = run_agent(&harness, definition, AgentInputs::new()).await;
    assert_eq!(outcome.reason, TerminationReason::Goal);
    assert!(outcome.result.contains("ok"));

    // The rejected completion was echoed back as an errored tool response.
    let sent = harness.chat.sent_log();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].iter().any(|p| matches!(
        p,
        Part::FunctionResponse { response } if response.is_error()
    )));
}

// Scenario: max-turn hit with successful recovery.
#[tokio::test]
async fn max_turns_recovers_to_goal() {
    let harness = harness(vec![
        vec![
            call("shell", "c1", serde_json::json!({"command": "a"})),
            finish(),
        ],
        vec![
            call("shell", "c2", serde_json::json!({"command": "b"})),
            finish(),
        ],
        vec![completion("c3", serde_json::json!({})), finish()],
    ]);
    let definition = AgentDefinition::builder("scout")
        .model(remote_model())
        .system_prompt("Explore.")
        .tool_named("shell")
        .max_turns(2)
        .build();

    let (outcome, _) = run_agent(&harness, definition, AgentInputs::new()).await;
    assert_eq!(outcome.reason, TerminationReason::Goal);

    let (reason, success) = harness.telemetry.recovery().unwrap();
    assert_eq!(reason, TerminationReason::MaxTurns);
    assert!(success);
}

// Scenario: timeout with failed recovery.
struct StallingFactory;

struct StallingChat;

#[async_trait]
impl ChatSession for StallingChat {
    async fn send_message_stream(
        &mut self,
        _parts: Vec<Part>,
        _prompt_id: &str,
    ) -> Result<ChatStream<'_>, AgentError> {
        Ok(Box::pin(futures::stream::pending::<
            Result<ChatChunk, AgentError>,
        >()))
    }
}

impl ChatFactory for StallingFactory {
    fn create_session(
        &self,
        _model: &ModelConfig,
        _options: SessionOptions,
    ) -> Result<Box<dyn ChatSession>, AgentError> {
        Ok(Box::new(StallingChat))
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_surfaces_after_failed_recovery() {
    let telemetry = Arc::new(Recorder::default());
    let host = HostContext::new(
        shell_registry() as Arc<dyn ToolDispatch>,
        Arc::new(StallingFactory),
        Arc::new(FixedEnv),
    )
    .with_telemetry(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>)
    .with_interrupts(Arc::new(InterruptManager::new()))
    .with_retry(RetryPolicy::none());

    let definition = AgentDefinition::builder("slowpoke")
        .model(remote_model())
        .system_prompt("Explore.")
        .tool_named("shell")
        .max_time_minutes(0.05)
        .build();

    let mut executor = AgentExecutor::new(Arc::new(definition), host, None).unwrap();
    let outcome = executor
        .run(AgentInputs::new(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.reason, TerminationReason::Timeout);
    assert!(outcome.result.contains("Agent timed out after 0.05 minutes."));
    let (reason, success) = telemetry.recovery().unwrap();
    assert_eq!(reason, TerminationReason::Timeout);
    assert!(!success);
}

// Scenario: soft interrupt with operator continuation.
struct InterruptingShell {
    interrupts: Arc<InterruptManager>,
    hard: bool,
}

#[async_trait]
impl RegisteredTool for InterruptingShell {
    fn declaration(&self) -> ToolDeclaration {
        builtin::shell()
    }

    async fn invoke(
        &self,
        _args: &Map<String, Value>,
        cancel: CancellationToken,
        _on_chunk: Option<OutputChunkHandler>,
    ) -> Result<ToolExecOutcome, ToolError> {
        self.interrupts.set_hard_abort(self.hard);
        self.interrupts.abort_current();
        cancel.cancelled().await;
        Err(ToolError::Cancelled)
    }
}

#[tokio::test]
async fn soft_interrupt_continues_with_operator_text() {
    let interrupts = Arc::new(InterruptManager::new());
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(InterruptingShell {
        interrupts: Arc::clone(&interrupts),
        hard: false,
    }));

    let mut harness = harness_with_registry(
        vec![
            vec![
                call("shell", "c1", serde_json::json!({"command": "slow"})),
                finish(),
            ],
            vec![completion("c2", serde_json::json!({})), finish()],
        ],
        Arc::new(registry),
    );
    let rewired = harness.host.clone().with_interrupts(Arc::clone(&interrupts));
    harness.host = rewired;
    harness.interrupts = interrupts;
    harness
        .steering
        .offer(Some("focus on tests instead".to_string()));

    let definition = AgentDefinition::builder("scout")
        .model(remote_model())
        .system_prompt("Explore.")
        .tool_named("shell")
        .build();

    let (outcome, events) = run_agent(&harness, definition, AgentInputs::new()).await;
    assert_eq!(outcome.reason, TerminationReason::Goal);

    let sent = harness.chat.sent_log();
    assert_eq!(sent[1].len(), 1);
    assert_eq!(sent[1][0].as_text(), Some("focus on tests instead"));

    assert!(events
        .iter()
        .any(|e| matches!(e.kind, ActivityKind::Interrupted { hard: false })));
}

// Boundary wiring: invoke_sub_agent balances the interrupt stack and
// forwards child activity to the parent sink.
#[tokio::test]
async fn sub_agent_invocation_forwards_activity_and_balances_stack() {
    let harness = harness(vec![
        vec![
            call("shell", "c1", serde_json::json!({"command": "a"})),
            finish(),
        ],
        vec![completion("c2", serde_json::json!({})), finish()],
    ]);
    let definition = Arc::new(
        AgentDefinition::builder("child")
            .model(remote_model())
            .system_prompt("Explore.")
            .tool_named("shell")
            .build(),
    );

    let (parent_tx, mut parent_rx) = mpsc::channel(256);
    let depth_before = harness.interrupts.depth();
    let outcome = invoke_sub_agent(
        definition,
        &harness.host,
        AgentInputs::new(),
        CancellationToken::new(),
        Some(parent_tx),
    )
    .await
    .unwrap();

    assert_eq!(outcome.reason, TerminationReason::Goal);
    assert_eq!(harness.interrupts.depth(), depth_before);

    let mut forwarded = Vec::new();
    while let Ok(event) = parent_rx.try_recv() {
        forwarded.push(event);
    }
    assert!(forwarded.iter().any(|e| matches!(
        e.kind,
        ActivityKind::ToolCallStart { ref name, .. } if name == "shell"
    )));
    assert!(forwarded.iter().all(|e| e.agent_name == "child"));
}

// Nesting depth is capped.
#[tokio::test]
async fn nesting_depth_is_capped() {
    let harness = harness(vec![]);
    let mut context = harness.host.clone();
    for _ in 0..=ferret::MAX_NESTING_DEPTH {
        context = context.for_child();
    }

    let definition = Arc::new(
        AgentDefinition::builder("too-deep")
            .model(remote_model())
            .system_prompt("Explore.")
            .build(),
    );
    let err = match AgentExecutor::new(definition, context, None) {
        Ok(_) => panic!("expected AgentExecutor::new to fail at nesting depth limit"),
        Err(e) => e,
    };
    assert!(matches!(err, AgentError::DepthLimitExceeded { .. }));
}

// The query template interpolates declared inputs.
#[tokio::test]
async fn query_template_drives_first_message() {
    let harness = harness(vec![vec![completion("c1", serde_json::json!({})), finish()]]);
    let definition = AgentDefinition::builder("greeter")
        .model(remote_model())
        .system_prompt("Greet.")
        .input(InputSpec::required("name", "who to greet"))
        .query("Say hello to ${name}.")
        .build();

    let mut inputs = AgentInputs::new();
    inputs.insert("name".to_string(), "Ada".to_string());
    let (outcome, _) = run_agent(&harness, definition, inputs).await;
    assert_eq!(outcome.reason, TerminationReason::Goal);

    let sent = harness.chat.sent_log();
    assert_eq!(sent[0][0].as_text(), Some("Say hello to Ada."));
}

// Orphan output chunks survive forwarding with an empty tool name.
#[tokio::test]
async fn orphan_output_chunk_keeps_flowing() {
    let (child_tx, child_rx) = mpsc::channel(8);
    let (parent_tx, mut parent_rx) = mpsc::channel(8);
    let forwarder = tokio::spawn(forward_activity(child_rx, parent_tx));

    child_tx
        .send(ActivityEvent::new(
            "child",
            ActivityKind::ToolOutputChunk {
                call_id: "never-started".to_string(),
                name: "shell".to_string(),
                chunk: "stray".to_string(),
            },
        ))
        .await
        .unwrap();
    drop(child_tx);
    forwarder.await.unwrap();

    let event = parent_rx.recv().await.unwrap();
    assert!(matches!(
        event.kind,
        ActivityKind::ToolOutputChunk { ref name, ref chunk, .. }
            if name.is_empty() && chunk == "stray"
    ));
}
