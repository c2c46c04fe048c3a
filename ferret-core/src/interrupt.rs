//! Interrupt routing for nested agents.
//!
//! A LIFO stack of per-agent frames, one per active agent. Only the
//! innermost frame receives a cancellation, so the operator's first
//! interrupt stops the running sub-agent without touching its parent.
//!
//! All operations are short synchronous critical sections; the cooperative
//! driver serializes the callers, so a plain mutex suffices. The host MUST
//! deliver operator key events through a single dispatcher task so that
//! `set_hard_abort` and `abort_current` cannot race each other.

use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Frame {
    turn_token: Option<CancellationToken>,
    hard: bool,
}

/// Process-wide stack of interrupt frames.
pub struct InterruptManager {
    stack: Mutex<Vec<Frame>>,
}

impl InterruptManager {
    pub fn new() -> Self {
        Self {
            stack: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide instance the operator-signal router targets.
    ///
    /// Tests that need isolation construct their own manager instead.
    pub fn shared() -> Arc<InterruptManager> {
        static GLOBAL: OnceLock<Arc<InterruptManager>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(InterruptManager::new())).clone()
    }

    /// Push a fresh frame for a starting agent.
    pub fn start_agent_session(&self) {
        self.stack.lock().expect("interrupt stack poisoned").push(Frame::default());
    }

    /// Pop the innermost frame when its agent returns or throws.
    pub fn end_agent_session(&self) {
        self.stack.lock().expect("interrupt stack poisoned").pop();
    }

    /// Replace the innermost frame's cancellation handle for a new turn and
    /// reset hardness.
    pub fn set_current_turn_token(&self, token: CancellationToken) {
        let mut stack = self.stack.lock().expect("interrupt stack poisoned");
        if let Some(frame) = stack.last_mut() {
            frame.turn_token = Some(token);
            frame.hard = false;
        }
    }

    /// Latch the hardness of the next cancellation on the innermost frame.
    ///
    /// Must be set before [`abort_current`](Self::abort_current) so the
    /// classification is race-free.
    pub fn set_hard_abort(&self, hard: bool) {
        let mut stack = self.stack.lock().expect("interrupt stack poisoned");
        if let Some(frame) = stack.last_mut() {
            frame.hard = hard;
        }
    }

    /// Cancel the innermost frame's current turn.
    pub fn abort_current(&self) {
        let stack = self.stack.lock().expect("interrupt stack poisoned");
        if let Some(frame) = stack.last() {
            if let Some(token) = &frame.turn_token {
                tracing::debug!(hard = frame.hard, "interrupting innermost agent frame");
                token.cancel();
            }
        }
    }

    /// Whether the innermost frame's pending interrupt is hard.
    pub fn is_current_interrupt_hard(&self) -> bool {
        let stack = self.stack.lock().expect("interrupt stack poisoned");
        stack.last().map(|f| f.hard).unwrap_or(false)
    }

    /// Current nesting depth (observable for invariant checks).
    pub fn depth(&self) -> usize {
        self.stack.lock().expect("interrupt stack poisoned").len()
    }
}

impl Default for InterruptManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point for the operator's interrupt key.
///
/// The host binds this to the key handler and counts presses within the
/// current turn; a second press escalates to hard. Hardness is latched
/// before the abort so the classification cannot race the driver.
pub fn operator_interrupt(manager: &InterruptManager, presses_this_turn: u32) {
    manager.set_hard_abort(presses_this_turn > 1);
    manager.abort_current();
}
