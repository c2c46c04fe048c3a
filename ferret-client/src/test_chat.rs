//! Deterministic scripted chat for tests.

use async_trait::async_trait;
use ferret_core::chat::{
    ChatChunk, ChatFactory, ChatSession, ChatStream, FinishReason, SessionOptions,
};
use ferret_core::definition::ModelConfig;
use ferret_core::error::AgentError;
use ferret_core::types::Part;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Chat session that replays a fixed script, one chunk list per turn.
///
/// When the script runs out, remaining turns finish immediately with no
/// content.
pub struct TestChat {
    turns: VecDeque<Vec<ChatChunk>>,
    sent: Arc<Mutex<Vec<Vec<Part>>>>,
}

impl TestChat {
    pub fn new(turns: Vec<Vec<ChatChunk>>) -> Self {
        Self {
            turns: turns.into_iter().collect(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle to the messages this session received.
    pub fn sent_log(&self) -> Arc<Mutex<Vec<Vec<Part>>>> {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl ChatSession for TestChat {
    async fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
        _prompt_id: &str,
    ) -> Result<ChatStream<'_>, AgentError> {
        self.sent.lock().expect("sent log poisoned").push(parts);
        let chunks = self
            .turns
            .pop_front()
            .unwrap_or_else(|| vec![ChatChunk::finish(FinishReason::Stop)]);
        let events: Vec<Result<ChatChunk, AgentError>> = chunks.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Factory producing [`TestChat`] sessions from queued scripts, one script
/// per created session.
pub struct TestChatFactory {
    scripts: Mutex<VecDeque<Vec<Vec<ChatChunk>>>>,
    sent: Arc<Mutex<Vec<Vec<Part>>>>,
}

impl TestChatFactory {
    pub fn new(scripts: Vec<Vec<Vec<ChatChunk>>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// One session, one script.
    pub fn single(script: Vec<Vec<ChatChunk>>) -> Arc<Self> {
        Self::new(vec![script])
    }

    /// Every message any produced session received, in order.
    pub fn sent_log(&self) -> Vec<Vec<Part>> {
        self.sent.lock().expect("sent log poisoned").clone()
    }
}

impl ChatFactory for TestChatFactory {
    fn create_session(
        &self,
        _model: &ModelConfig,
        _options: SessionOptions,
    ) -> Result<Box<dyn ChatSession>, AgentError> {
        let turns = self
            .scripts
            .lock()
            .expect("scripts poisoned")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(TestChat {
            turns: turns.into_iter().collect(),
            sent: Arc::clone(&self.sent),
        }))
    }
}
