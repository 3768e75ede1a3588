use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Parameters handed to the engine once, when a model is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model_path: PathBuf,
    pub min_p: f32,
    pub temperature: f32,
    pub context_size: i64,
    pub chat_template: String,
    pub thread_count: usize,
    pub use_memory_map: bool,
    pub use_memory_lock: bool,
    pub store_history: bool,
}

/// Lifecycle of the single inference session.
///
/// `Cancelled` and `Failed` after a stream are settling states: the session
/// records them and immediately returns to `Ready`. `Failed` after an
/// initialization attempt is sticky until the next `initialize` or `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Streaming,
    Cancelled,
    Failed,
}

impl SessionState {
    /// Whether moving from `self` to `to` is a legal edge of the state machine.
    /// `close()` may reach `Uninitialized` from anywhere and is not checked here.
    pub fn can_transition(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Uninitialized | Ready | Failed | Cancelled, Initializing)
                | (Initializing, Ready | Failed)
                | (Ready, Streaming)
                | (Streaming, Ready | Cancelled | Failed)
                | (Cancelled | Failed, Ready)
        )
    }

    pub fn is_streaming(self) -> bool {
        self == SessionState::Streaming
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Streaming => "streaming",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub final_text: String,
    pub tokens_per_second: f32,
    pub elapsed_seconds: f64,
    pub context_tokens_used: u64,
}
