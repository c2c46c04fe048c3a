//! Invocation boundary between a parent context and a sub-agent.
//!
//! Owns the cancellation plumbing and the soft-interrupt rendezvous, and
//! forwards child activity into the parent's stream. The interrupt frame is
//! always popped, whether the child returns or throws.

use crate::activity::{ActivityEvent, ActivityKind, ActivitySink};
use crate::definition::{AgentDefinition, AgentInputs};
use crate::error::AgentError;
use crate::executor::{AgentExecutor, HostContext};
use crate::interrupt::InterruptManager;
use crate::types::AgentOutcome;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// One-shot rendezvous carrying operator text after a soft interrupt.
///
/// The host UI is the producer; the executor is the consumer. `offer(None)`
/// means the operator supplied nothing and the agent should stop. Delivery
/// may be pre-emptive: a value offered before the executor observed the
/// cancellation is consumed without re-blocking.
pub struct SteeringSlot {
    value: Mutex<Option<Option<String>>>,
    notify: Notify,
}

impl SteeringSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        })
    }

    /// Set the operator's answer. A later offer overwrites an unconsumed one.
    pub fn offer(&self, text: Option<String>) {
        *self.value.lock().expect("steering slot poisoned") = Some(text);
        self.notify.notify_one();
    }

    /// Consume the operator's answer, waiting for one if none is staged.
    pub async fn take(&self) -> Option<String> {
        loop {
            if let Some(staged) = self.value.lock().expect("steering slot poisoned").take() {
                return staged;
            }
            self.notify.notified().await;
        }
    }
}

/// RAII frame guard: pushes an interrupt frame on entry, pops it on drop.
pub struct SubAgentScope {
    interrupts: Arc<InterruptManager>,
}

impl SubAgentScope {
    pub fn enter(interrupts: Arc<InterruptManager>) -> Self {
        interrupts.start_agent_session();
        Self { interrupts }
    }
}

impl Drop for SubAgentScope {
    fn drop(&mut self) {
        self.interrupts.end_agent_session();
    }
}

/// Forward child activity into the parent sink until the child channel
/// closes.
///
/// An output chunk whose call-id was never started keeps flowing with an
/// empty tool name; downstream renders it as a synthetic response. That
/// mirrors the upstream behavior consumers already depend on.
pub async fn forward_activity(
    mut child_rx: mpsc::Receiver<ActivityEvent>,
    parent_tx: ActivitySink,
) {
    let mut started_calls: HashSet<String> = HashSet::new();
    while let Some(mut event) = child_rx.recv().await {
        match &mut event.kind {
            ActivityKind::ToolCallStart { call_id, .. } => {
                started_calls.insert(call_id.clone());
            }
            ActivityKind::ToolOutputChunk { call_id, name, .. } => {
                if !started_calls.contains(call_id) {
                    name.clear();
                }
            }
            _ => {}
        }
        if parent_tx.send(event).await.is_err() {
            break;
        }
    }
}

/// Run a sub-agent on behalf of a parent context.
///
/// In order: push the interrupt frame, wire activity forwarding, drive the
/// executor, and pop the frame no matter how the run ended.
pub async fn invoke_sub_agent(
    definition: Arc<AgentDefinition>,
    parent: &HostContext,
    inputs: AgentInputs,
    external_cancel: CancellationToken,
    parent_sink: Option<ActivitySink>,
) -> Result<AgentOutcome, AgentError> {
    let _scope = SubAgentScope::enter(parent.interrupts.clone());

    let (child_tx, forwarder) = match parent_sink {
        Some(parent_tx) => {
            let (tx, rx) = mpsc::channel(64);
            let task = tokio::spawn(forward_activity(rx, parent_tx));
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    let child_context = parent.for_child();
    let result = async {
        let mut executor = AgentExecutor::new(definition, child_context, child_tx)?;
        executor.run(inputs, external_cancel).await
    }
    .await;

    if let Some(task) = forwarder {
        // Executor dropped its sender; the forwarder drains and exits.
        let _ = task.await;
    }
    result
}
