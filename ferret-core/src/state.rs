//! Turn-level state machine for the agent driver.
//!
//! Defines valid phases and transitions; the executor never moves between
//! phases except through [`TurnPhase::transition`].

use crate::error::AgentError;
use serde::{Deserialize, Serialize};

/// Phases of one agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// About to start a turn; limits and cancellation are checked here.
    ReadyForTurn,
    /// Consuming the model stream.
    AwaitingModel,
    /// Executing the turn's tool invocations.
    ProcessingCalls,
    /// Parked on the soft-interrupt rendezvous, waiting for operator text.
    AwaitingSteering,
    /// A termination reason has been decided; recovery may still run.
    Terminating,
    /// Terminal.
    Done,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Validate a transition from this phase to another.
    pub fn can_transition_to(&self, next: &TurnPhase) -> bool {
        use TurnPhase::*;

        match (self, next) {
            // From ReadyForTurn
            (ReadyForTurn, AwaitingModel) => true,  // limits pass
            (ReadyForTurn, Terminating) => true,    // limit hit or cancel

            // From AwaitingModel
            (AwaitingModel, ProcessingCalls) => true,  // >= 1 invocation
            (AwaitingModel, AwaitingSteering) => true, // soft interrupt
            (AwaitingModel, Terminating) => true,      // no calls / hard interrupt

            // From ProcessingCalls
            (ProcessingCalls, ReadyForTurn) => true,    // responses aggregated
            (ProcessingCalls, AwaitingSteering) => true, // soft interrupt mid-tool
            (ProcessingCalls, Terminating) => true,      // completion or hard interrupt

            // From AwaitingSteering
            (AwaitingSteering, ReadyForTurn) => true, // operator supplied text
            (AwaitingSteering, Terminating) => true,  // operator supplied nothing

            // From Terminating
            (Terminating, Done) => true,

            _ => false,
        }
    }

    /// Transition to a new phase, returning an error if invalid.
    pub fn transition(&mut self, next: TurnPhase) -> Result<(), AgentError> {
        if self.can_transition_to(&next) {
            *self = next;
            Ok(())
        } else {
            Err(AgentError::InvalidStateTransition {
                from: format!("{self:?}"),
                to: format!("{next:?}"),
            })
        }
    }
}

impl Default for TurnPhase {
    fn default() -> Self {
        Self::ReadyForTurn
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadyForTurn => write!(f, "ready_for_turn"),
            Self::AwaitingModel => write!(f, "awaiting_model"),
            Self::ProcessingCalls => write!(f, "processing_calls"),
            Self::AwaitingSteering => write!(f, "awaiting_steering"),
            Self::Terminating => write!(f, "terminating"),
            Self::Done => write!(f, "done"),
        }
    }
}
