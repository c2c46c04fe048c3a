//! Local chat adapter.
//!
//! Wraps a local model that returns only text. The adapter owns the
//! conversation history, injects the system instruction and the optional
//! reminder on the wire without persisting them, and surfaces cumulative
//! text as thought chunks while streaming.

use crate::types::{LocalRequest, LocalTransport, WireMessage};
use async_trait::async_trait;
use ferret_core::chat::{ChatChunk, ChatSession, ChatStream, ChunkPart, FinishReason, SessionOptions};
use ferret_core::definition::SamplingParams;
use ferret_core::error::AgentError;
use ferret_core::types::{Part, Role, TurnMessage};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const ROLE_SYSTEM: &str = "system";
const ROLE_USER: &str = "user";
const ROLE_MODEL: &str = "model";

/// Chat session over a [`LocalTransport`].
pub struct LocalChat {
    transport: Arc<dyn LocalTransport>,
    model: String,
    endpoint: String,
    params: SamplingParams,
    system: String,
    reminder: Option<String>,
    history: Arc<Mutex<Vec<WireMessage>>>,
    /// When set, the last system prompt and user message are dumped to disk
    /// as a debugging aid. Observable, not contractual.
    debug_dir: Option<PathBuf>,
}

impl LocalChat {
    pub fn new(
        transport: Arc<dyn LocalTransport>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        options: SessionOptions,
    ) -> Self {
        let seeded: Vec<WireMessage> = options
            .initial_messages
            .iter()
            .map(wire_from_turn)
            .collect();
        Self {
            transport,
            model: model.into(),
            endpoint: endpoint.into(),
            params: options.params,
            system: options.system_instruction,
            reminder: options.reminder,
            history: Arc::new(Mutex::new(seeded)),
            debug_dir: None,
        }
    }

    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn history(&self) -> Vec<WireMessage> {
        self.history.lock().expect("history poisoned").clone()
    }

    fn dump_debug(&self, user_text: &str) {
        let Some(dir) = &self.debug_dir else { return };
        if let Err(err) = std::fs::create_dir_all(dir) {
            tracing::debug!(error = %err, "debug dump directory unavailable");
            return;
        }
        let _ = std::fs::write(dir.join("last_system_prompt.txt"), &self.system);
        let _ = std::fs::write(dir.join("last_user_message.txt"), user_text);
    }
}

#[async_trait]
impl ChatSession for LocalChat {
    async fn send_message_stream(
        &mut self,
        parts: Vec<Part>,
        _prompt_id: &str,
    ) -> Result<ChatStream<'_>, AgentError> {
        let user_text = render_parts(&parts);
        self.dump_debug(&user_text);

        // Persist only the bare user text; system and reminder are
        // wire-only edits.
        let wire = {
            let mut history = self.history.lock().expect("history poisoned");
            history.push(WireMessage::new(ROLE_USER, user_text));

            let mut wire: Vec<WireMessage> = Vec::with_capacity(history.len() + 1);
            wire.push(WireMessage::new(ROLE_SYSTEM, self.system.clone()));
            wire.extend(history.iter().cloned());
            if let Some(reminder) = &self.reminder {
                if let Some(last) = wire.last_mut() {
                    last.text = format!("{}\n\n{reminder}", last.text);
                }
            }
            wire
        };

        let request = LocalRequest {
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            messages: wire,
            params: self.params.clone(),
        };
        let transport = Arc::clone(&self.transport);
        let history = Arc::clone(&self.history);

        let stream = async_stream::stream! {
            let mut cumulative = String::new();
            let mut inner = transport.stream_text(&request);
            while let Some(item) = inner.next().await {
                match item {
                    Ok(delta) => {
                        cumulative.push_str(&delta);
                        yield Ok(ChatChunk::thought(cumulative.clone()));
                    }
                    Err(err) => {
                        yield Err(err.into());
                        return;
                    }
                }
            }
            drop(inner);
            history
                .lock()
                .expect("history poisoned")
                .push(WireMessage::new(ROLE_MODEL, cumulative.clone()));
            yield Ok(ChatChunk {
                parts: vec![ChunkPart::Text { text: cumulative }],
                finish: Some(FinishReason::Stop),
            });
        };
        Ok(Box::pin(stream))
    }
}

/// Render message parts for the text-only wire.
fn render_parts(parts: &[Part]) -> String {
    let mut sections = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            Part::Text { text } => sections.push(text.clone()),
            Part::FunctionResponse { response } => {
                let body = serde_json::to_string(&response.payload)
                    .unwrap_or_else(|_| "{}".to_string());
                sections.push(format!("Tool response for {}: {body}", response.name));
            }
            Part::FunctionCall { call } => {
                let body = serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());
                sections.push(format!("{}({body})", call.name));
            }
        }
    }
    sections.join("\n")
}

fn wire_from_turn(message: &TurnMessage) -> WireMessage {
    let role = match message.role {
        Role::User => ROLE_USER,
        Role::Model => ROLE_MODEL,
    };
    WireMessage::new(role, render_parts(&message.parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatError;
    use futures::stream::BoxStream;

    struct RecordingTransport {
        requests: Arc<Mutex<Vec<LocalRequest>>>,
        deltas: Vec<&'static str>,
    }

    #[async_trait]
    impl LocalTransport for RecordingTransport {
        fn stream_text<'a>(
            &'a self,
            request: &'a LocalRequest,
        ) -> BoxStream<'a, Result<String, ChatError>> {
            self.requests.lock().unwrap().push(request.clone());
            let deltas: Vec<Result<String, ChatError>> =
                self.deltas.iter().map(|d| Ok(d.to_string())).collect();
            Box::pin(futures::stream::iter(deltas))
        }
    }

    fn transport(deltas: Vec<&'static str>) -> (Arc<RecordingTransport>, Arc<Mutex<Vec<LocalRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        (
            Arc::new(RecordingTransport {
                requests: Arc::clone(&requests),
                deltas,
            }),
            requests,
        )
    }

    fn options(reminder: Option<&str>) -> SessionOptions {
        SessionOptions {
            system_instruction: "You are a scout.".to_string(),
            reminder: reminder.map(str::to_string),
            ..SessionOptions::default()
        }
    }

    #[tokio::test]
    async fn wire_prepends_system_without_persisting() {
        let (transport, requests) = transport(vec!["hi"]);
        let mut chat = LocalChat::new(transport, "small", "http://localhost:11434", options(None));

        let stream = chat
            .send_message_stream(vec![Part::text("hello")], "p#0")
            .await
            .unwrap();
        let _ = stream.collect::<Vec<_>>().await;

        let sent = requests.lock().unwrap();
        assert_eq!(sent[0].messages[0].role, ROLE_SYSTEM);
        assert_eq!(sent[0].messages[1].role, ROLE_USER);

        // History never contains the system instruction.
        let history = chat.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ROLE_USER);
        assert_eq!(history[0].text, "hello");
        assert_eq!(history[1].role, ROLE_MODEL);
        assert_eq!(history[1].text, "hi");
    }

    #[tokio::test]
    async fn reminder_is_wire_only() {
        let (transport, requests) = transport(vec!["ok"]);
        let mut chat = LocalChat::new(
            transport,
            "small",
            "http://localhost:11434",
            options(Some("Remember: absolute paths.")),
        );

        let stream = chat
            .send_message_stream(vec![Part::text("list files")], "p#0")
            .await
            .unwrap();
        let _ = stream.collect::<Vec<_>>().await;

        let sent = requests.lock().unwrap();
        let last = sent[0].messages.last().unwrap();
        assert!(last.text.contains("list files"));
        assert!(last.text.contains("Remember: absolute paths."));

        assert_eq!(chat.history()[0].text, "list files");
    }

    #[tokio::test]
    async fn cumulative_thoughts_then_terminal_text() {
        let (transport, _) = transport(vec!["a", "b", "c"]);
        let mut chat = LocalChat::new(transport, "small", "http://localhost:11434", options(None));

        let stream = chat
            .send_message_stream(vec![Part::text("go")], "p#0")
            .await
            .unwrap();
        let chunks: Vec<ChatChunk> = stream.map(Result::unwrap).collect().await;

        let thoughts: Vec<&str> = chunks
            .iter()
            .flat_map(|c| &c.parts)
            .filter_map(|p| match p {
                ChunkPart::Thought { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(thoughts, vec!["a", "ab", "abc"]);

        let last = chunks.last().unwrap();
        assert_eq!(last.finish, Some(FinishReason::Stop));
        assert!(matches!(
            &last.parts[0],
            ChunkPart::Text { text } if text == "abc"
        ));
    }

    #[tokio::test]
    async fn tool_responses_render_as_text() {
        let (transport, requests) = transport(vec!["ok"]);
        let mut chat = LocalChat::new(transport, "small", "http://localhost:11434", options(None));

        let response = ferret_core::types::ToolResponse::success(
            "c1",
            "shell",
            serde_json::json!("listing"),
            None,
        );
        let stream = chat
            .send_message_stream(vec![Part::FunctionResponse { response }], "p#0")
            .await
            .unwrap();
        let _ = stream.collect::<Vec<_>>().await;

        let sent = requests.lock().unwrap();
        let user = &sent[0].messages[1];
        assert!(user.text.starts_with("Tool response for shell:"));
        assert!(user.text.contains("listing"));
    }

    #[tokio::test]
    async fn debug_dump_writes_prompt_files() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _) = transport(vec!["ok"]);
        let mut chat = LocalChat::new(transport, "small", "http://localhost:11434", options(None))
            .with_debug_dir(dir.path());

        let stream = chat
            .send_message_stream(vec![Part::text("inspect")], "p#0")
            .await
            .unwrap();
        let _ = stream.collect::<Vec<_>>().await;

        let system = std::fs::read_to_string(dir.path().join("last_system_prompt.txt")).unwrap();
        assert_eq!(system, "You are a scout.");
        let user = std::fs::read_to_string(dir.path().join("last_user_message.txt")).unwrap();
        assert_eq!(user, "inspect");
    }
}
