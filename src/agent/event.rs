use crate::core::error::EngineError;
use crate::core::session::GenerationResult;

/// Events delivered for one `generate` call. Exactly one of the terminal
/// variants (`Complete`, `Cancelled`, `Error`) ends every stream.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Fragment { text: String },
    Complete { result: GenerationResult },
    Cancelled,
    Error { error: EngineError },
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionEvent::Fragment { .. })
    }
}
