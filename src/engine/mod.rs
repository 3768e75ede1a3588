pub mod gguf;
mod llama_server;
mod scripted;

pub use llama_server::LlamaServerEngine;
pub use scripted::{ScriptedEngine, ScriptedReply};

use crate::core::config::{AppConfig, EngineKind};
use crate::core::engine::Engine;
use crate::core::error::EngineError;
use std::sync::Arc;

/// Build the engine backend named in the config.
pub fn create_engine(config: &AppConfig) -> Result<Arc<dyn Engine>, EngineError> {
    let engine: Arc<dyn Engine> = match config.engine.kind {
        EngineKind::LlamaServer => Arc::new(LlamaServerEngine::new(
            config.engine.server_url.clone(),
            config.engine.timeout_secs,
        )?),
        EngineKind::Scripted => Arc::new(ScriptedEngine::from_replies(
            config.engine.scripted_replies.clone(),
        )),
    };
    tracing::debug!(engine = engine.name(), "engine created");
    Ok(engine)
}
