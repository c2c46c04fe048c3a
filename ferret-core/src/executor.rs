//! The agent executor: drives the turn loop for one sub-agent invocation.
//!
//! One cooperative driver per agent: one model stream at a time, tool
//! invocations within a turn scheduled concurrently and awaited as a group,
//! responses assembled in invocation order. Suspension happens in exactly
//! three places: consuming a model chunk, awaiting a tool execution, and
//! awaiting the soft-interrupt rendezvous.

use crate::activity::{self, activity_kind_type, extract_thought, ActivityEvent, ActivityKind, ActivitySink};
use crate::allowlist::is_allow_listed;
use crate::boundary::SteeringSlot;
use crate::chat::{ChatFactory, ChatSession, ChunkPart, CompressionStatus};
use crate::definition::{
    check_inputs, AgentDefinition, AgentInputs, OutputSpec, ToolDeclaration, ToolRef,
};
use crate::error::{AgentError, ToolError};
use crate::host::{
    EnvironmentContext, NoopTelemetry, OutputChunkHandler, RegisteredTool, TelemetryRecord,
    TelemetrySink, ToolDispatch, ToolExecOutcome,
};
use crate::interrupt::InterruptManager;
use crate::parser::ToolCallParser;
use crate::prompt::{assemble_system_prompt, build_query};
use crate::retry::RetryPolicy;
use crate::state::TurnPhase;
use crate::types::{
    AgentId, AgentOutcome, Part, TerminationReason, ToolInvocation, ToolResponse,
    COMPLETE_TASK_TOOL,
};
use futures::future::join_all;
use futures::StreamExt;
use jsonschema::Validator;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Maximum parent→child nesting depth.
pub const MAX_NESTING_DEPTH: u32 = 4;

/// Grace window granted to the recovery turn.
const RECOVERY_GRACE: Duration = Duration::from_secs(60);

const GENERIC_COMPLETION: &str = "Task completed.";
const GENERIC_RESULT: &str = "Task completed successfully.";
const ALREADY_COMPLETE: &str = "Task already marked complete in this turn.";
const ALL_CALLS_FAILED: &str =
    "All tool calls in this turn failed. Review the errors above and try an alternative approach.";

/// Everything the host supplies to run agents.
#[derive(Clone)]
pub struct HostContext {
    pub tools: Arc<dyn ToolDispatch>,
    pub chat: Arc<dyn ChatFactory>,
    pub environment: Arc<dyn EnvironmentContext>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub interrupts: Arc<InterruptManager>,
    pub steering: Arc<SteeringSlot>,
    pub summarizer: Option<Arc<dyn crate::host::ToolOutputSummarizer>>,
    pub retry: RetryPolicy,
    /// Agent-id of the delegating agent, chained into child ids.
    pub parent_agent_id: Option<AgentId>,
    /// Nesting depth of the agent this context will run (0 = top level).
    pub depth: u32,
}

impl HostContext {
    pub fn new(
        tools: Arc<dyn ToolDispatch>,
        chat: Arc<dyn ChatFactory>,
        environment: Arc<dyn EnvironmentContext>,
    ) -> Self {
        Self {
            tools,
            chat,
            environment,
            telemetry: Arc::new(NoopTelemetry),
            interrupts: InterruptManager::shared(),
            steering: SteeringSlot::new(),
            summarizer: None,
            retry: RetryPolicy::default(),
            parent_agent_id: None,
            depth: 0,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_interrupts(mut self, interrupts: Arc<InterruptManager>) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_steering(mut self, steering: Arc<SteeringSlot>) -> Self {
        self.steering = steering;
        self
    }

    pub fn with_summarizer(
        mut self,
        summarizer: Arc<dyn crate::host::ToolOutputSummarizer>,
    ) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parent(mut self, parent: AgentId) -> Self {
        self.parent_agent_id = Some(parent);
        self
    }

    /// Context for an agent nested one level below this one.
    pub fn for_child(&self) -> Self {
        let mut child = self.clone();
        child.depth = self.depth + 1;
        child
    }
}

/// Per-agent filtered view over the host's tool set.
///
/// Built once at executor construction and never mutated during the run.
struct AdoptedTool {
    tool: Arc<dyn RegisteredTool>,
    validator: Option<Validator>,
}

struct AgentToolView {
    declarations: Vec<ToolDeclaration>,
    names: HashSet<String>,
    instances: HashMap<String, AdoptedTool>,
    host: Arc<dyn ToolDispatch>,
}

impl AgentToolView {
    fn build(
        definition: &AgentDefinition,
        host: Arc<dyn ToolDispatch>,
    ) -> Result<Self, AgentError> {
        let mut declarations = Vec::new();
        let mut names = HashSet::new();
        let mut instances: HashMap<String, AdoptedTool> = HashMap::new();

        for tool_ref in &definition.tools {
            let (name, declaration) = match tool_ref {
                ToolRef::Named(name) => {
                    let Some(declaration) =
                        host.declarations().into_iter().find(|d| &d.name == name)
                    else {
                        return Err(AgentError::Configuration(format!(
                            "agent '{}': tool '{}' is not registered with the host",
                            definition.name, name
                        )));
                    };
                    (name.clone(), declaration)
                }
                ToolRef::Declared(declaration) => (declaration.name.clone(), declaration.clone()),
                ToolRef::Instance(tool) => {
                    let declaration = tool.declaration();
                    instances.insert(
                        declaration.name.clone(),
                        AdoptedTool {
                            tool: Arc::clone(tool),
                            validator: Validator::new(&declaration.parameters).ok(),
                        },
                    );
                    (declaration.name.clone(), declaration)
                }
            };

            if !is_allow_listed(&name) {
                return Err(AgentError::Configuration(format!(
                    "agent '{}': tool '{}' is not cleared for non-interactive execution",
                    definition.name, name
                )));
            }
            if names.insert(name) {
                declarations.push(declaration);
            }
        }

        Ok(Self {
            declarations,
            names,
            instances,
            host,
        })
    }

    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    async fn execute(
        &self,
        invocation: &ToolInvocation,
        cancel: CancellationToken,
        on_chunk: Option<OutputChunkHandler>,
    ) -> Result<ToolExecOutcome, ToolError> {
        if let Some(adopted) = self.instances.get(&invocation.name) {
            if let Some(validator) = &adopted.validator {
                let instance = Value::Object(invocation.args.clone());
                let errors: Vec<String> = validator
                    .iter_errors(&instance)
                    .map(|e| format!("{}: {}", e.instance_path, e))
                    .collect();
                if !errors.is_empty() {
                    return Err(ToolError::invalid_arguments(
                        &invocation.name,
                        errors.join("; "),
                    ));
                }
            }
            adopted.tool.invoke(&invocation.args, cancel, on_chunk).await
        } else {
            self.host.execute(invocation, cancel, on_chunk).await
        }
    }
}

/// How tool invocations are obtained from the model response.
enum CallStrategy {
    /// The backend emits structured function calls natively.
    Native,
    /// Text-only backend; invocations are parsed out of the terminal text.
    Parsed(ToolCallParser),
}

/// What one consumed model stream produced.
struct StreamedTurn {
    text: String,
    calls: Vec<ToolInvocation>,
    cancelled: bool,
}

enum CancelOutcome {
    Abort,
    Timeout,
    Steering,
}

enum RelayMsg {
    Event(ActivityKind),
    Flush(oneshot::Sender<()>),
}

/// Relay for events produced off the driver (tool output chunks) so they
/// stay ordered ahead of the driver's post-dispatch events.
struct ChunkRelay {
    tx: mpsc::UnboundedSender<RelayMsg>,
    task: tokio::task::JoinHandle<()>,
}

impl ChunkRelay {
    fn spawn(sink: ActivitySink, agent_name: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RelayMsg::Event(kind) => {
                        let _ = sink.send(ActivityEvent::new(&agent_name, kind)).await;
                    }
                    RelayMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx, task }
    }

    fn send(&self, kind: ActivityKind) {
        let _ = self.tx.send(RelayMsg::Event(kind));
    }

    fn chunk_handler(&self, call_id: String, name: String) -> OutputChunkHandler {
        let tx = self.tx.clone();
        Arc::new(move |chunk: &str| {
            let _ = tx.send(RelayMsg::Event(ActivityKind::ToolOutputChunk {
                call_id: call_id.clone(),
                name: name.clone(),
                chunk: chunk.to_string(),
            }));
        })
    }

    /// Wait until everything queued so far has been delivered.
    async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(RelayMsg::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// Outcome of processing one turn's invocations.
enum CallsOutcome {
    /// An accepted completion ends the run with this result.
    Completed(String),
    /// The loop continues; these parts form the next user message.
    Continue(Vec<Part>),
}

/// Executes one agent definition to completion.
pub struct AgentExecutor {
    definition: Arc<AgentDefinition>,
    host: HostContext,
    tools: AgentToolView,
    activity: Option<ActivitySink>,
    agent_id: AgentId,
    strategy: CallStrategy,
    output_validator: Option<Validator>,
    turn_count: u32,
    compression_failed: bool,
    last_activity: Mutex<Option<&'static str>>,
}

impl AgentExecutor {
    /// Build an executor for one invocation of `definition`.
    ///
    /// Fails with a configuration error when a referenced tool is unknown or
    /// not allow-listed, or when nesting exceeds the depth limit.
    pub fn new(
        definition: Arc<AgentDefinition>,
        host: HostContext,
        activity: Option<ActivitySink>,
    ) -> Result<Self, AgentError> {
        if host.depth > MAX_NESTING_DEPTH {
            return Err(AgentError::DepthLimitExceeded {
                depth: host.depth,
                max: MAX_NESTING_DEPTH,
            });
        }

        let tools = AgentToolView::build(&definition, Arc::clone(&host.tools))?;
        let output_validator = match &definition.output {
            Some(spec) => Some(Validator::new(&spec.schema).map_err(|e| {
                AgentError::Configuration(format!(
                    "agent '{}': invalid output schema: {e}",
                    definition.name
                ))
            })?),
            None => None,
        };
        let strategy = if definition.model.is_local() {
            CallStrategy::Parsed(ToolCallParser::new())
        } else {
            CallStrategy::Native
        };
        let agent_id = AgentId::new(host.parent_agent_id.as_ref(), &definition.name);

        Ok(Self {
            definition,
            host,
            tools,
            activity,
            agent_id,
            strategy,
            output_validator,
            turn_count: 0,
            compression_failed: false,
            last_activity: Mutex::new(None),
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Discriminator of the most recently emitted activity event.
    pub fn last_activity(&self) -> Option<&'static str> {
        *self.last_activity.lock().expect("activity latch poisoned")
    }

    /// Host context for agents this agent delegates to.
    pub fn context_for_children(&self) -> HostContext {
        let mut child = self.host.for_child();
        child.parent_agent_id = Some(self.agent_id.clone());
        child
    }

    /// The full declaration set sent to the model: the filtered registry
    /// plus the synthetic completion tool, exactly once.
    pub fn schema_set(&self) -> Vec<ToolDeclaration> {
        let mut declarations = self.tools.declarations.clone();
        declarations.retain(|d| d.name != COMPLETE_TASK_TOOL);
        declarations.push(completion_declaration(self.definition.output.as_ref()));
        declarations
    }

    async fn emit(&self, kind: ActivityKind) {
        *self.last_activity.lock().expect("activity latch poisoned") =
            Some(activity_kind_type(&kind));
        activity::emit(self.activity.as_ref(), &self.definition.name, kind).await;
    }

    /// Drive the agent to termination.
    ///
    /// All terminal reasons are reported through the returned
    /// [`AgentOutcome`]; `Err` is reserved for wiring mistakes (bad inputs,
    /// state-machine violations).
    pub async fn run(
        &mut self,
        inputs: AgentInputs,
        external_cancel: CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        check_inputs(&self.definition, &inputs)?;

        let started = Instant::now();
        self.host.telemetry.record(TelemetryRecord::AgentStart {
            agent_id: self.agent_id.clone(),
            name: self.definition.name.clone(),
        });
        tracing::info!(agent_id = %self.agent_id, agent = %self.definition.name, "agent run started");

        let outcome = match self.drive(&inputs, &external_cancel).await {
            Ok(outcome) => outcome,
            Err(err @ AgentError::InvalidStateTransition { .. }) => return Err(err),
            Err(err) => {
                tracing::warn!(agent_id = %self.agent_id, error = %err, "agent run failed");
                self.emit(ActivityKind::Error {
                    message: err.to_string(),
                })
                .await;
                AgentOutcome {
                    result: err.to_string(),
                    reason: TerminationReason::Error,
                }
            }
        };

        self.host.telemetry.record(TelemetryRecord::AgentFinish {
            agent_id: self.agent_id.clone(),
            name: self.definition.name.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            turns: self.turn_count,
            reason: outcome.reason,
        });
        tracing::info!(
            agent_id = %self.agent_id,
            reason = %outcome.reason,
            turns = self.turn_count,
            "agent run finished"
        );
        Ok(outcome)
    }

    async fn drive(
        &mut self,
        inputs: &AgentInputs,
        external_cancel: &CancellationToken,
    ) -> Result<AgentOutcome, AgentError> {
        let declarations = self.schema_set();
        let system_prompt = assemble_system_prompt(
            &self.definition,
            inputs,
            &declarations,
            self.host.environment.as_ref(),
        )?;
        let mut session = self.host.chat.create_session(
            &self.definition.model,
            crate::chat::SessionOptions {
                system_instruction: system_prompt,
                initial_messages: self
                    .definition
                    .prompt
                    .initial_messages
                    .clone()
                    .unwrap_or_default(),
                tools: declarations,
                params: self.definition.model.params().clone(),
                reminder: self.definition.prompt.reminder.clone(),
            },
        )?;

        let relay = self
            .activity
            .clone()
            .map(|sink| ChunkRelay::spawn(sink, self.definition.name.clone()));

        // Master wall timer: fires once per run.
        let timeout_token = CancellationToken::new();
        let timer = {
            let token = timeout_token.clone();
            let budget = Duration::from_secs_f64(self.definition.run.max_time_minutes * 60.0);
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                token.cancel();
            })
        };

        let result = self
            .turn_loop(
                session.as_mut(),
                inputs,
                external_cancel,
                &timeout_token,
                relay.as_ref(),
            )
            .await;

        timer.abort();
        if let Some(relay) = relay {
            relay.shutdown().await;
        }
        result
    }

    async fn turn_loop(
        &mut self,
        session: &mut dyn ChatSession,
        inputs: &AgentInputs,
        external_cancel: &CancellationToken,
        timeout_token: &CancellationToken,
        relay: Option<&ChunkRelay>,
    ) -> Result<AgentOutcome, AgentError> {
        let mut phase = TurnPhase::default();
        let mut next_message: Vec<Part> = vec![Part::text(build_query(&self.definition, inputs)?)];
        let mut reason = TerminationReason::Error;
        let mut goal_result: Option<String> = None;
        let mut pending: Option<(Vec<ToolInvocation>, String)> = None;
        let mut turn_token = CancellationToken::new();

        loop {
            match phase {
                TurnPhase::ReadyForTurn => {
                    if self.turn_count >= self.definition.run.max_turns {
                        reason = TerminationReason::MaxTurns;
                        phase.transition(TurnPhase::Terminating)?;
                    } else if timeout_token.is_cancelled() {
                        reason = TerminationReason::Timeout;
                        phase.transition(TurnPhase::Terminating)?;
                    } else if external_cancel.is_cancelled() {
                        reason = TerminationReason::Aborted;
                        phase.transition(TurnPhase::Terminating)?;
                    } else {
                        phase.transition(TurnPhase::AwaitingModel)?;
                    }
                }

                TurnPhase::AwaitingModel => {
                    if !self.compression_failed {
                        match session.compress_history(false).await {
                            Ok(CompressionStatus::CompressionFailedInflatedTokenCount) => {
                                tracing::warn!(
                                    agent_id = %self.agent_id,
                                    "history compression inflated the token count; disabling for this run"
                                );
                                self.compression_failed = true;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                tracing::warn!(agent_id = %self.agent_id, error = %err, "history compression failed");
                            }
                        }
                    }

                    turn_token = CancellationToken::new();
                    self.host.interrupts.set_current_turn_token(turn_token.clone());

                    let user_text = joined_text(&next_message);
                    if !user_text.is_empty() {
                        self.emit(ActivityKind::UserMessage { text: user_text }).await;
                    }

                    let prompt_id = self.agent_id.prompt_id(self.turn_count);
                    let streamed = self
                        .call_model(
                            session,
                            std::mem::take(&mut next_message),
                            &prompt_id,
                            &turn_token,
                            timeout_token,
                            external_cancel,
                        )
                        .await?;
                    self.turn_count += 1;

                    if streamed.cancelled {
                        match self.classify_cancel(external_cancel, timeout_token) {
                            CancelOutcome::Timeout => {
                                reason = TerminationReason::Timeout;
                                phase.transition(TurnPhase::Terminating)?;
                            }
                            CancelOutcome::Abort => {
                                self.emit(ActivityKind::Interrupted { hard: true }).await;
                                reason = TerminationReason::Aborted;
                                phase.transition(TurnPhase::Terminating)?;
                            }
                            CancelOutcome::Steering => {
                                self.emit(ActivityKind::Interrupted { hard: false }).await;
                                phase.transition(TurnPhase::AwaitingSteering)?;
                            }
                        }
                    } else {
                        let calls = self.extract_calls(&streamed, &prompt_id);
                        if calls.is_empty() {
                            reason = TerminationReason::NoCompletionCall;
                            phase.transition(TurnPhase::Terminating)?;
                        } else {
                            pending = Some((calls, streamed.text));
                            phase.transition(TurnPhase::ProcessingCalls)?;
                        }
                    }
                }

                TurnPhase::ProcessingCalls => {
                    let (calls, model_text) = pending.take().unwrap_or_default();
                    let outcome = self
                        .process_calls(&calls, &model_text, &turn_token, relay)
                        .await;

                    match outcome {
                        CallsOutcome::Completed(result) => {
                            goal_result = Some(result);
                            reason = TerminationReason::Goal;
                            phase.transition(TurnPhase::Terminating)?;
                        }
                        CallsOutcome::Continue(parts) => {
                            if turn_token.is_cancelled()
                                || timeout_token.is_cancelled()
                                || external_cancel.is_cancelled()
                            {
                                match self.classify_cancel(external_cancel, timeout_token) {
                                    CancelOutcome::Timeout => {
                                        reason = TerminationReason::Timeout;
                                        phase.transition(TurnPhase::Terminating)?;
                                    }
                                    CancelOutcome::Abort => {
                                        self.emit(ActivityKind::Interrupted { hard: true }).await;
                                        reason = TerminationReason::Aborted;
                                        phase.transition(TurnPhase::Terminating)?;
                                    }
                                    CancelOutcome::Steering => {
                                        self.emit(ActivityKind::Interrupted { hard: false }).await;
                                        phase.transition(TurnPhase::AwaitingSteering)?;
                                    }
                                }
                            } else {
                                next_message = parts;
                                phase.transition(TurnPhase::ReadyForTurn)?;
                            }
                        }
                    }
                }

                TurnPhase::AwaitingSteering => {
                    tokio::select! {
                        _ = external_cancel.cancelled() => {
                            reason = TerminationReason::Aborted;
                            phase.transition(TurnPhase::Terminating)?;
                        }
                        _ = timeout_token.cancelled() => {
                            reason = TerminationReason::Timeout;
                            phase.transition(TurnPhase::Terminating)?;
                        }
                        answer = self.host.steering.take() => {
                            match answer {
                                Some(text) => {
                                    tracing::debug!(agent_id = %self.agent_id, "operator redirected the agent");
                                    next_message = vec![Part::text(text)];
                                    phase.transition(TurnPhase::ReadyForTurn)?;
                                }
                                None => {
                                    reason = TerminationReason::Aborted;
                                    phase.transition(TurnPhase::Terminating)?;
                                }
                            }
                        }
                    }
                }

                TurnPhase::Terminating => {
                    let mut result = goal_result
                        .take()
                        .unwrap_or_else(|| self.failure_result(reason));

                    if reason.is_recoverable() {
                        let (final_reason, final_result) = self
                            .recovery_turn(session, external_cancel, reason)
                            .await;
                        reason = final_reason;
                        result = final_result;
                    }

                    phase.transition(TurnPhase::Done)?;
                    return Ok(AgentOutcome { result, reason });
                }

                TurnPhase::Done => {
                    unreachable!("loop returns before entering the terminal phase");
                }
            }
        }
    }

    /// Establish and consume one model stream, honoring cancellation at
    /// every chunk boundary.
    async fn call_model(
        &self,
        session: &mut dyn ChatSession,
        parts: Vec<Part>,
        prompt_id: &str,
        turn_token: &CancellationToken,
        timeout_token: &CancellationToken,
        external_cancel: &CancellationToken,
    ) -> Result<StreamedTurn, AgentError> {
        let mut attempt = 0u32;
        let mut stream = loop {
            if attempt > 0 {
                tokio::time::sleep(self.host.retry.delay_for_attempt(attempt)).await;
            }
            match session.send_message_stream(parts.clone(), prompt_id).await {
                Ok(stream) => break stream,
                Err(err) if err.is_recoverable() && self.host.retry.should_retry(attempt) => {
                    tracing::warn!(
                        agent_id = %self.agent_id,
                        attempt = attempt + 1,
                        error = %err,
                        "model stream failed; retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };

        let mut text = String::new();
        let mut calls = Vec::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = turn_token.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = timeout_token.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = external_cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                chunk = stream.next() => {
                    match chunk {
                        None => break,
                        Some(Err(err)) => return Err(err),
                        Some(Ok(chunk)) => {
                            for part in chunk.parts {
                                match part {
                                    ChunkPart::Text { text: t } => text.push_str(&t),
                                    ChunkPart::Thought { text: raw } => {
                                        let (subject, body) = extract_thought(&raw);
                                        self.emit(ActivityKind::ThoughtChunk {
                                            subject,
                                            text: body,
                                        })
                                        .await;
                                    }
                                    ChunkPart::FunctionCall { call } => calls.push(call),
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(StreamedTurn {
            text,
            calls,
            cancelled,
        })
    }

    /// Obtain the turn's invocations per the configured call strategy.
    fn extract_calls(&self, streamed: &StreamedTurn, prompt_id: &str) -> Vec<ToolInvocation> {
        match &self.strategy {
            CallStrategy::Native => streamed.calls.clone(),
            CallStrategy::Parsed(parser) => {
                let mut calls = parser.parse(&streamed.text, prompt_id);
                if calls.is_empty() {
                    if let Some(spec) = &self.definition.output {
                        // Weak instruction followers: synthesize the
                        // completion from the terminal text.
                        calls.push(synthesize_completion(&streamed.text, spec, prompt_id));
                    }
                }
                calls
            }
        }
    }

    fn classify_cancel(
        &self,
        external_cancel: &CancellationToken,
        timeout_token: &CancellationToken,
    ) -> CancelOutcome {
        if timeout_token.is_cancelled() {
            CancelOutcome::Timeout
        } else if external_cancel.is_cancelled() || self.host.interrupts.is_current_interrupt_hard() {
            CancelOutcome::Abort
        } else {
            CancelOutcome::Steering
        }
    }

    /// Handle one turn's invocations: completion synchronously first, the
    /// rest concurrently, responses assembled in invocation order.
    async fn process_calls(
        &self,
        calls: &[ToolInvocation],
        model_text: &str,
        turn_token: &CancellationToken,
        relay: Option<&ChunkRelay>,
    ) -> CallsOutcome {
        enum Slot {
            Ready(ToolResponse),
            Pending(usize),
        }

        let mut completed: Option<String> = None;
        let mut slots: Vec<Slot> = Vec::with_capacity(calls.len());
        let mut scheduled: Vec<&ToolInvocation> = Vec::new();

        for call in calls.iter() {
            if call.is_completion() {
                let response = self.handle_completion(call, &mut completed, model_text);
                slots.push(Slot::Ready(response));
                continue;
            }

            self.emit(ActivityKind::ToolCallStart {
                call_id: call.call_id.clone(),
                name: call.name.clone(),
                args: Value::Object(call.args.clone()),
            })
            .await;

            if !self.tools.contains(&call.name) {
                tracing::warn!(
                    agent_id = %self.agent_id,
                    tool = %call.name,
                    "model invoked a tool outside the filtered registry"
                );
                let err = ToolError::unauthorized(&call.name);
                self.emit(ActivityKind::Error {
                    message: err.to_string(),
                })
                .await;
                slots.push(Slot::Ready(ToolResponse::error(
                    &call.call_id,
                    &call.name,
                    err.to_string(),
                )));
                continue;
            }

            slots.push(Slot::Pending(scheduled.len()));
            scheduled.push(call);
        }

        let executions = scheduled.iter().map(|call| {
            let cancel = turn_token.clone();
            let on_chunk =
                relay.map(|r| r.chunk_handler(call.call_id.clone(), call.name.clone()));
            async move {
                let started = Instant::now();
                let result = self.tools.execute(call, cancel, on_chunk).await;
                (result, started.elapsed())
            }
        });
        let results = join_all(executions).await;

        let mut responses: Vec<ToolResponse> = Vec::with_capacity(calls.len());
        for (slot, call) in slots.into_iter().zip(calls.iter()) {
            let response = match slot {
                Slot::Ready(response) => response,
                Slot::Pending(pos) => {
                    let (result, elapsed) = &results[pos];
                    self.response_for_execution(call, result, *elapsed, relay)
                        .await
                }
            };
            responses.push(response);
        }

        if let Some(relay) = relay {
            relay.flush().await;
        }

        if let Some(result) = completed {
            return CallsOutcome::Completed(result);
        }

        let all_failed = responses.iter().all(ToolResponse::is_error);
        let mut parts: Vec<Part> = responses
            .into_iter()
            .map(|response| Part::FunctionResponse { response })
            .collect();
        if all_failed {
            parts.push(Part::text(ALL_CALLS_FAILED));
        }
        CallsOutcome::Continue(parts)
    }

    /// Map one finished execution to its response part, summarizing
    /// successful output when configured, and emit the per-call terminal
    /// activity.
    async fn response_for_execution(
        &self,
        call: &ToolInvocation,
        result: &Result<ToolExecOutcome, ToolError>,
        elapsed: Duration,
        relay: Option<&ChunkRelay>,
    ) -> ToolResponse {
        let failure = match result {
            Ok(outcome) => match &outcome.error {
                None => {
                    let mut content = outcome.content.clone();
                    if self.definition.run.summarize_tool_output {
                        if let Some(summarizer) = &self.host.summarizer {
                            let raw = value_as_text(&content);
                            match summarizer.summarize(&call.name, &raw).await {
                                Ok(summary) => content = Value::String(summary),
                                Err(err) => {
                                    tracing::warn!(
                                        agent_id = %self.agent_id,
                                        tool = %call.name,
                                        error = %err,
                                        "tool output summarization failed; keeping raw output"
                                    );
                                }
                            }
                        }
                    }
                    let display = outcome
                        .display
                        .clone()
                        .unwrap_or_else(|| value_as_text(&content));
                    if let Some(relay) = relay {
                        relay.send(ActivityKind::ToolCallEnd {
                            call_id: call.call_id.clone(),
                            name: call.name.clone(),
                            result_display: display.clone(),
                            duration_ms: elapsed.as_millis() as u64,
                        });
                    }
                    return ToolResponse::success(&call.call_id, &call.name, content, Some(display));
                }
                Some(error) => error.message.clone(),
            },
            Err(err) => err.to_string(),
        };

        if let Some(relay) = relay {
            relay.send(ActivityKind::Error {
                message: format!("{}: {failure}", call.name),
            });
        }
        ToolResponse::error(&call.call_id, &call.name, failure)
    }

    /// Completion-tool semantics: idempotent within the turn, output
    /// validated against the declared schema, post-processor applied to the
    /// accepted output.
    fn handle_completion(
        &self,
        call: &ToolInvocation,
        completed: &mut Option<String>,
        model_text: &str,
    ) -> ToolResponse {
        if completed.is_some() {
            return ToolResponse::error(&call.call_id, &call.name, ALREADY_COMPLETE);
        }

        match &self.definition.output {
            Some(spec) => {
                let Some(value) = call.args.get(&spec.name) else {
                    return ToolResponse::error(
                        &call.call_id,
                        &call.name,
                        format!("Missing required argument '{}'", spec.name),
                    );
                };
                if let Some(validator) = &self.output_validator {
                    let errors: Vec<String> = validator
                        .iter_errors(value)
                        .map(|e| format!("{}: {}", e.instance_path, e))
                        .collect();
                    if !errors.is_empty() {
                        return ToolResponse::error(&call.call_id, &call.name, errors.join("; "));
                    }
                }

                let mut wrapped = Map::new();
                wrapped.insert(spec.name.clone(), value.clone());
                let mut rendered = serde_json::to_string_pretty(&Value::Object(wrapped))
                    .unwrap_or_else(|_| value.to_string());
                if let Some(process) = &self.definition.prompt.process_output {
                    rendered = process(rendered);
                }
                *completed = Some(rendered);
            }
            None => {
                let result = if self.definition.model.is_local() {
                    let stripped = strip_completion_fragment(model_text);
                    if stripped.is_empty() {
                        GENERIC_RESULT.to_string()
                    } else {
                        stripped
                    }
                } else {
                    GENERIC_RESULT.to_string()
                };
                *completed = Some(result);
            }
        }

        ToolResponse::success(
            &call.call_id,
            &call.name,
            Value::String(GENERIC_COMPLETION.to_string()),
            None,
        )
    }

    /// One additional turn after a recoverable limit: a synthesized message
    /// demanding an immediate completion, under a bounded grace window
    /// combined with the external cancel only.
    async fn recovery_turn(
        &mut self,
        session: &mut dyn ChatSession,
        external_cancel: &CancellationToken,
        original: TerminationReason,
    ) -> (TerminationReason, String) {
        let attempt_started = Instant::now();
        let grace = CancellationToken::new();
        let timer = {
            let token = grace.clone();
            tokio::spawn(async move {
                tokio::time::sleep(RECOVERY_GRACE).await;
                token.cancel();
            })
        };
        self.host.interrupts.set_current_turn_token(grace.clone());

        let message = self.recovery_message(original);
        self.emit(ActivityKind::UserMessage {
            text: message.clone(),
        })
        .await;

        let prompt_id = self.agent_id.prompt_id(self.turn_count);
        let streamed = self
            .call_model(
                session,
                vec![Part::text(message)],
                &prompt_id,
                &grace,
                &grace,
                external_cancel,
            )
            .await;
        timer.abort();
        self.turn_count += 1;

        let mut completed: Option<String> = None;
        if let Ok(streamed) = &streamed {
            if !streamed.cancelled {
                let calls = self.extract_calls(streamed, &prompt_id);
                for call in calls.iter().filter(|c| c.is_completion()) {
                    let _ = self.handle_completion(call, &mut completed, &streamed.text);
                    if completed.is_some() {
                        break;
                    }
                }
            }
        }

        let success = completed.is_some();
        self.host.telemetry.record(TelemetryRecord::RecoveryAttempt {
            reason: original,
            elapsed_ms: attempt_started.elapsed().as_millis() as u64,
            success,
            turns: self.turn_count,
        });

        match completed {
            Some(result) => {
                tracing::info!(agent_id = %self.agent_id, "recovery turn produced a valid completion");
                (TerminationReason::Goal, result)
            }
            None => {
                let failure = self.failure_result(original);
                self.emit(ActivityKind::Error {
                    message: format!("Recovery turn failed. {failure}"),
                })
                .await;
                (original, failure)
            }
        }
    }

    fn recovery_message(&self, reason: TerminationReason) -> String {
        let limit = match reason {
            TerminationReason::MaxTurns => format!(
                "the maximum number of turns ({}) was reached",
                self.definition.run.max_turns
            ),
            TerminationReason::Timeout => format!(
                "the time budget ({} minutes) elapsed",
                self.definition.run.max_time_minutes
            ),
            _ => "your last response contained no tool call".to_string(),
        };
        format!(
            "You have exceeded your limits: {limit}. You MUST call 'complete_task' now, \
             in this turn, with the best result you can produce from the work done so far. \
             Do not call any other tool."
        )
    }

    fn failure_result(&self, reason: TerminationReason) -> String {
        match reason {
            TerminationReason::Goal => GENERIC_RESULT.to_string(),
            TerminationReason::MaxTurns => format!(
                "Agent reached the maximum of {} turns without calling complete_task.",
                self.definition.run.max_turns
            ),
            TerminationReason::Timeout => format!(
                "Agent timed out after {} minutes.",
                self.definition.run.max_time_minutes
            ),
            TerminationReason::NoCompletionCall => {
                "Agent stopped without calling complete_task.".to_string()
            }
            TerminationReason::Aborted => "Agent execution was aborted.".to_string(),
            TerminationReason::Error => "Agent run failed.".to_string(),
        }
    }
}

fn joined_text(parts: &[Part]) -> String {
    parts
        .iter()
        .filter_map(Part::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Declaration of the synthetic completion tool.
fn completion_declaration(output: Option<&OutputSpec>) -> ToolDeclaration {
    match output {
        Some(spec) => {
            let mut properties = Map::new();
            properties.insert(spec.name.clone(), spec.schema.clone());
            ToolDeclaration::new(
                COMPLETE_TASK_TOOL,
                "Mark the task complete and deliver the final output.",
                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": [spec.name.clone()],
                }),
            )
        }
        None => ToolDeclaration::new(
            COMPLETE_TASK_TOOL,
            "Mark the task complete.",
            serde_json::json!({"type": "object", "properties": {}}),
        ),
    }
}

/// Synthesize a completion invocation from terminal model text (local
/// backends with a declared output only).
fn synthesize_completion(text: &str, spec: &OutputSpec, prompt_id: &str) -> ToolInvocation {
    let stripped = crate::parser::strip_code_fences(text);
    let args = match serde_json::from_str::<Value>(&stripped) {
        Ok(Value::Object(map)) if map.contains_key(&spec.name) => map,
        Ok(value) => {
            let mut map = Map::new();
            map.insert(spec.name.clone(), value);
            map
        }
        Err(_) => {
            let mut map = Map::new();
            map.insert(spec.name.clone(), Value::String(text.trim().to_string()));
            map
        }
    };
    ToolInvocation::new(
        crate::types::call_id_for(prompt_id, 0),
        COMPLETE_TASK_TOOL,
        args,
    )
}

/// Remove the completion-call JSON fragment from terminal model text.
fn strip_completion_fragment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        // Find the matching close brace for this candidate object.
        let mut depth = 0usize;
        let mut end = None;
        for (offset, ch) in rest[start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(start + offset);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else { break };
        let candidate = &rest[start..=end];
        if candidate.contains(COMPLETE_TASK_TOOL)
            && serde_json::from_str::<Value>(candidate).is_ok()
        {
            out.push_str(&rest[..start]);
            rest = &rest[end + 1..];
        } else {
            out.push_str(&rest[..=end]);
            rest = &rest[end + 1..];
        }
    }
    out.push_str(rest);

    // Drop fence leftovers around the removed fragment.
    out.replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}
