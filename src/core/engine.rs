use async_trait::async_trait;
use std::pin::Pin;

use crate::core::error::EngineError;
use crate::core::session::SessionConfig;

/// Lazily produced text fragments. Dropping the stream stops production.
pub type FragmentStream =
    Pin<Box<dyn futures_core::Stream<Item = Result<String, EngineError>> + Send>>;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineMetrics {
    pub tokens_per_second: f32,
    pub context_tokens_used: u64,
}

/// A non-reentrant text generator. Only `InferenceSession` drives it, and it
/// never has more than one stream in flight.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn load(&self, config: &SessionConfig) -> Result<(), EngineError>;

    /// The returned stream must not borrow `self`; errors before the first
    /// fragment are yielded as the first item.
    fn generate(&self, prompt: String) -> FragmentStream;

    /// Metrics of the most recent completed generation.
    fn metrics(&self) -> EngineMetrics;

    fn unload(&self);

    fn name(&self) -> &str;
}
