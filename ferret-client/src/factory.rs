//! Chat session factory wiring transports to the executor.

use crate::local::LocalChat;
use crate::remote::RemoteChat;
use crate::types::{LocalTransport, RemoteTransport};
use ferret_core::chat::{ChatCompression, ChatFactory, ChatSession, SessionOptions};
use ferret_core::definition::ModelConfig;
use ferret_core::error::AgentError;
use std::path::PathBuf;
use std::sync::Arc;

/// Creates [`RemoteChat`] or [`LocalChat`] sessions per model
/// configuration. A host registers the transports it actually has; asking
/// for a backend with no transport is a configuration error.
#[derive(Default)]
pub struct TransportChatFactory {
    remote: Option<Arc<dyn RemoteTransport>>,
    local: Option<Arc<dyn LocalTransport>>,
    compression: Option<Arc<dyn ChatCompression>>,
    debug_dir: Option<PathBuf>,
}

impl TransportChatFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remote(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.remote = Some(transport);
        self
    }

    pub fn with_local(mut self, transport: Arc<dyn LocalTransport>) -> Self {
        self.local = Some(transport);
        self
    }

    pub fn with_compression(mut self, compression: Arc<dyn ChatCompression>) -> Self {
        self.compression = Some(compression);
        self
    }

    /// Enable local-adapter debug dumps under `dir`.
    pub fn with_debug_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }
}

impl ChatFactory for TransportChatFactory {
    fn create_session(
        &self,
        model: &ModelConfig,
        options: SessionOptions,
    ) -> Result<Box<dyn ChatSession>, AgentError> {
        match model {
            ModelConfig::Remote { model, .. } => {
                let transport = self.remote.clone().ok_or_else(|| {
                    AgentError::Configuration(
                        "no remote transport registered with the chat factory".to_string(),
                    )
                })?;
                let mut chat = RemoteChat::new(transport, model.clone(), options);
                if let Some(compression) = &self.compression {
                    chat = chat.with_compression(Arc::clone(compression));
                }
                Ok(Box::new(chat))
            }
            ModelConfig::Local {
                model, endpoint, ..
            } => {
                let transport = self.local.clone().ok_or_else(|| {
                    AgentError::Configuration(
                        "no local transport registered with the chat factory".to_string(),
                    )
                })?;
                let mut chat =
                    LocalChat::new(transport, model.clone(), endpoint.clone(), options);
                if let Some(dir) = &self.debug_dir {
                    chat = chat.with_debug_dir(dir.clone());
                }
                Ok(Box::new(chat))
            }
        }
    }
}
