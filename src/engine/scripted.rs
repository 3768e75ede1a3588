//! Offline engine that replays canned replies.
//!
//! Drives the whole pipeline without a model: used by tests and by the
//! `scripted` engine kind for demos.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::engine::{Engine, EngineMetrics, FragmentStream};
use crate::core::error::EngineError;
use crate::core::session::SessionConfig;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Split on spaces into fragments.
    Text(String),
    Fragments(Vec<String>),
    /// Emits the fragments, then fails mid-stream.
    FailAfter { fragments: Vec<String>, error: String },
}

impl ScriptedReply {
    fn into_parts(self) -> (Vec<String>, Option<String>) {
        match self {
            Self::Text(text) => (split_fragments(&text), None),
            Self::Fragments(fragments) => (fragments, None),
            Self::FailAfter { fragments, error } => (fragments, Some(error)),
        }
    }
}

fn split_fragments(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

pub struct ScriptedEngine {
    replies: Vec<ScriptedReply>,
    next_reply: AtomicUsize,
    fragment_delay: Duration,
    load_delay: Duration,
    load_error: Option<String>,
    loaded: AtomicBool,
    loads: AtomicUsize,
    unloads: AtomicUsize,
    emitted: Arc<AtomicUsize>,
    last_prompt: Arc<Mutex<Option<String>>>,
    metrics: Arc<Mutex<EngineMetrics>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            replies: vec![],
            next_reply: AtomicUsize::new(0),
            fragment_delay: Duration::ZERO,
            load_delay: Duration::ZERO,
            load_error: None,
            loaded: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
            emitted: Arc::new(AtomicUsize::new(0)),
            last_prompt: Arc::new(Mutex::new(None)),
            metrics: Arc::new(Mutex::new(EngineMetrics::default())),
        }
    }

    pub fn from_replies(replies: Vec<String>) -> Self {
        replies
            .into_iter()
            .fold(Self::new(), |engine, reply| engine.with_reply(reply))
    }

    pub fn with_reply(mut self, text: impl Into<String>) -> Self {
        self.replies.push(ScriptedReply::Text(text.into()));
        self
    }

    pub fn with_fragments(mut self, fragments: Vec<&str>) -> Self {
        self.replies.push(ScriptedReply::Fragments(
            fragments.into_iter().map(str::to_string).collect(),
        ));
        self
    }

    pub fn with_failure(mut self, fragments: Vec<&str>, error: impl Into<String>) -> Self {
        self.replies.push(ScriptedReply::FailAfter {
            fragments: fragments.into_iter().map(str::to_string).collect(),
            error: error.into(),
        });
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn with_load_error(mut self, error: impl Into<String>) -> Self {
        self.load_error = Some(error.into());
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    /// Fragments handed out so far, across all generations.
    pub fn fragments_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }

    /// Replies are replayed in order and wrap around.
    fn take_reply(&self) -> ScriptedReply {
        if self.replies.is_empty() {
            return ScriptedReply::Text("No scripted reply configured.".into());
        }
        let idx = self.next_reply.fetch_add(1, Ordering::SeqCst) % self.replies.len();
        self.replies[idx].clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn load(&self, config: &SessionConfig) -> Result<(), EngineError> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        if let Some(error) = &self.load_error {
            return Err(EngineError::Load(error.clone()));
        }
        tracing::debug!(model = %config.model_path.display(), "scripted engine loaded");
        self.loaded.store(true, Ordering::SeqCst);
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn generate(&self, prompt: String) -> FragmentStream {
        let loaded = self.is_loaded();
        let (fragments, failure) = self.take_reply().into_parts();
        let delay = self.fragment_delay;
        let metrics = Arc::clone(&self.metrics);
        let emitted = Arc::clone(&self.emitted);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.clone());
        }

        let stream = async_stream::stream! {
            if !loaded {
                yield Err(EngineError::NotLoaded);
            } else {
                let started = Instant::now();
                let produced = fragments.len();
                for fragment in fragments {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    emitted.fetch_add(1, Ordering::SeqCst);
                    yield Ok(fragment);
                }
                match failure {
                    Some(error) => {
                        yield Err(EngineError::Generation(error));
                    }
                    None => {
                        let secs = started.elapsed().as_secs_f32().max(f32::EPSILON);
                        if let Ok(mut m) = metrics.lock() {
                            *m = EngineMetrics {
                                tokens_per_second: produced as f32 / secs,
                                context_tokens_used: (prompt.split_whitespace().count() + produced)
                                    as u64,
                            };
                        }
                    }
                }
            }
        };

        Box::pin(stream)
    }

    fn metrics(&self) -> EngineMetrics {
        self.metrics.lock().map(|m| *m).unwrap_or_default()
    }

    fn unload(&self) {
        if self.loaded.swap(false, Ordering::SeqCst) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn config() -> SessionConfig {
        crate::core::config::AppConfig::default().session_config("model.gguf".into(), String::new())
    }

    async fn collect(engine: &ScriptedEngine) -> Vec<Result<String, EngineError>> {
        engine.generate("prompt".into()).collect().await
    }

    #[tokio::test]
    async fn replies_in_order_and_wrap() {
        let engine = ScriptedEngine::new().with_reply("one").with_reply("two");
        engine.load(&config()).await.unwrap();

        let texts: Vec<String> = vec![
            collect(&engine).await,
            collect(&engine).await,
            collect(&engine).await,
        ]
        .into_iter()
        .map(|frags| frags.into_iter().map(Result::unwrap).collect())
        .collect();
        assert_eq!(texts, vec!["one", "two", "one"]);
    }

    #[tokio::test]
    async fn text_reply_is_split_into_fragments() {
        let engine = ScriptedEngine::new().with_reply("a b c");
        engine.load(&config()).await.unwrap();
        let frags: Vec<String> = collect(&engine).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(frags, vec!["a ", "b ", "c"]);
        assert_eq!(engine.fragments_emitted(), 3);
        assert!(engine.metrics().context_tokens_used > 0);
    }

    #[tokio::test]
    async fn generate_before_load_fails() {
        let engine = ScriptedEngine::new().with_reply("x");
        let items = collect(&engine).await;
        assert_eq!(items, vec![Err(EngineError::NotLoaded)]);
    }

    #[tokio::test]
    async fn failure_after_fragments() {
        let engine = ScriptedEngine::new().with_failure(vec!["{", "\"a\""], "boom");
        engine.load(&config()).await.unwrap();
        let items = collect(&engine).await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[2], Err(EngineError::Generation("boom".into())));
    }

    #[tokio::test]
    async fn unload_counts_only_loaded_handles() {
        let engine = ScriptedEngine::new();
        engine.unload();
        assert_eq!(engine.unload_count(), 0);
        engine.load(&config()).await.unwrap();
        engine.unload();
        engine.unload();
        assert_eq!(engine.unload_count(), 1);
        assert!(!engine.is_loaded());
    }
}
