//! Tool-output summarization via the local model.
//!
//! Post-processes one tool response's raw content into a compact surrogate.
//! Remote-model summarization is deliberately not implemented; constructing
//! a summarizer from a remote configuration fails.

use crate::types::{LocalRequest, LocalTransport, WireMessage};
use async_trait::async_trait;
use ferret_core::definition::{ModelConfig, SamplingParams};
use ferret_core::error::AgentError;
use ferret_core::host::ToolOutputSummarizer;
use futures::StreamExt;
use std::sync::Arc;

/// Which summarizer prompt body to use. Selected by configuration, never
/// hard-coded by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummarizerStyle {
    /// Terse body for generic text output.
    #[default]
    Short,
    /// Longer body tuned for tool-call output.
    ToolCallOutput,
}

const SHORT_PROMPT: &str = "You are a text summarizer. Summarize the following \
content as a short bulleted list. Keep only the facts needed to act on the \
content. Output the bullets and nothing else.";

const TOOL_CALL_OUTPUT_PROMPT: &str = "You are a Tool Call Output Summarizer. \
You will receive the raw output of one tool call made by an autonomous agent. \
Produce a short bulleted summary that preserves: file paths, identifiers, \
error messages, counts, and any values the agent may need in later steps. \
Drop boilerplate, banners, and repeated lines. Output only the bullets.";

/// Summarizer backed by a local model.
pub struct LocalSummarizer {
    transport: Arc<dyn LocalTransport>,
    model: String,
    endpoint: String,
    params: SamplingParams,
    style: SummarizerStyle,
}

impl LocalSummarizer {
    /// Build from an agent's model configuration.
    ///
    /// Fails for remote configurations: routing tool output through the
    /// remote API is not implemented.
    pub fn for_model(
        config: &ModelConfig,
        transport: Arc<dyn LocalTransport>,
        style: SummarizerStyle,
    ) -> Result<Self, AgentError> {
        match config {
            ModelConfig::Local {
                model,
                endpoint,
                params,
            } => Ok(Self {
                transport,
                model: model.clone(),
                endpoint: endpoint.clone(),
                params: params.clone(),
                style,
            }),
            ModelConfig::Remote { .. } => Err(AgentError::NotImplemented(
                "tool-output summarization requires a local model".to_string(),
            )),
        }
    }

    fn prompt_body(&self) -> &'static str {
        match self.style {
            SummarizerStyle::Short => SHORT_PROMPT,
            SummarizerStyle::ToolCallOutput => TOOL_CALL_OUTPUT_PROMPT,
        }
    }
}

#[async_trait]
impl ToolOutputSummarizer for LocalSummarizer {
    async fn summarize(&self, tool_name: &str, content: &str) -> Result<String, AgentError> {
        let request = LocalRequest {
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            messages: vec![
                WireMessage::new("system", self.prompt_body()),
                WireMessage::new("user", format!("Output of `{tool_name}`:\n\n{content}")),
            ],
            params: self.params.clone(),
        };

        let mut out = String::new();
        let mut stream = self.transport.stream_text(&request);
        while let Some(delta) = stream.next().await {
            out.push_str(&delta.map_err(AgentError::from)?);
        }
        tracing::debug!(tool = tool_name, bytes = out.len(), "summarized tool output");
        Ok(out)
    }
}
