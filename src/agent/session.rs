use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::agent::event::SessionEvent;
use crate::core::engine::{Engine, FragmentStream};
use crate::core::error::{EngineError, SessionError};
use crate::core::session::{GenerationResult, SessionConfig, SessionState};

/// One slot: the engine runs at most one fragment ahead of the consumer.
const EVENT_BUFFER: usize = 1;

struct ActiveGeneration {
    id: u64,
    cancel: CancellationToken,
}

struct PendingInit {
    id: u64,
    cancel: CancellationToken,
}

struct Inner {
    state: SessionState,
    loaded: bool,
    config: Option<SessionConfig>,
    generation: Option<ActiveGeneration>,
    init: Option<PendingInit>,
    next_id: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, inner: &mut Inner, to: SessionState) -> Result<(), SessionError> {
        let from = inner.state;
        if !from.can_transition(to) {
            tracing::error!(%from, %to, "illegal session transition");
            return Err(SessionError::IllegalTransition { from, to });
        }
        self.set_state(inner, to);
        Ok(())
    }

    fn set_state(&self, inner: &mut Inner, to: SessionState) {
        tracing::debug!(from = %inner.state, %to, "session transition");
        inner.state = to;
        self.state_tx.send_replace(to);
    }

    /// Settles the session after generation `id` ended. A generation that was
    /// detached by `close()` leaves the state alone.
    fn finish_generation(&self, id: u64, event: &SessionEvent) {
        let mut inner = self.lock();
        if inner.generation.as_ref().map(|g| g.id) != Some(id) {
            return;
        }
        inner.generation = None;

        let settled = match event {
            SessionEvent::Complete { .. } => SessionState::Ready,
            SessionEvent::Cancelled => SessionState::Cancelled,
            SessionEvent::Error { .. } => SessionState::Failed,
            SessionEvent::Fragment { .. } => return,
        };
        let _ = self.transition(&mut inner, settled);
        if settled != SessionState::Ready {
            let _ = self.transition(&mut inner, SessionState::Ready);
        }
    }
}

/// Owns the single engine handle and serializes access to it.
///
/// At most one generation is in flight. Events for a generation are delivered
/// through the receiver returned by [`InferenceSession::generate`]; whoever
/// drains it is the consumer context. Dropping the session closes it.
pub struct InferenceSession {
    engine: Arc<dyn Engine>,
    shared: Arc<Shared>,
}

impl InferenceSession {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        Self {
            engine,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Uninitialized,
                    loaded: false,
                    config: None,
                    generation: None,
                    init: None,
                    next_id: 0,
                }),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn config(&self) -> Option<SessionConfig> {
        self.shared.lock().config.clone()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Loads a model, releasing any previously loaded one first.
    pub async fn initialize(&self, config: SessionConfig) -> Result<(), SessionError> {
        let (init_id, cancel, was_loaded) = {
            let mut inner = self.shared.lock();
            if matches!(
                inner.state,
                SessionState::Initializing | SessionState::Streaming
            ) {
                return Err(SessionError::Busy);
            }
            self.shared.transition(&mut inner, SessionState::Initializing)?;

            let id = inner.next_id;
            inner.next_id += 1;
            let cancel = CancellationToken::new();
            inner.init = Some(PendingInit {
                id,
                cancel: cancel.clone(),
            });
            inner.config = None;
            (id, cancel, std::mem::replace(&mut inner.loaded, false))
        };

        if was_loaded {
            tracing::debug!("releasing previously loaded model");
            self.engine.unload();
        }

        tracing::info!(model = %config.model_path.display(), engine = self.engine.name(), "loading model");
        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            r = self.engine.load(&config) => Some(r),
        };

        let mut inner = self.shared.lock();
        let current = inner.init.as_ref().map(|p| p.id) == Some(init_id);
        if !current {
            // close() ran while loading; it already reset the state.
            drop(inner);
            if matches!(result, Some(Ok(()))) {
                self.engine.unload();
            }
            return Err(SessionError::InitCancelled);
        }
        inner.init = None;

        match result {
            Some(Ok(())) => {
                inner.loaded = true;
                inner.config = Some(config);
                self.shared.transition(&mut inner, SessionState::Ready)?;
                tracing::info!("model loaded");
                Ok(())
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "model load failed");
                self.shared.transition(&mut inner, SessionState::Failed)?;
                Err(SessionError::InitFailed(e))
            }
            None => {
                self.shared.transition(&mut inner, SessionState::Failed)?;
                Err(SessionError::InitCancelled)
            }
        }
    }

    /// Starts a generation. Fails immediately with [`SessionError::Busy`] if one
    /// is already streaming; the in-flight job is not touched.
    pub fn generate(
        &self,
        prompt: String,
    ) -> Result<mpsc::Receiver<SessionEvent>, SessionError> {
        let (id, cancel) = {
            let mut inner = self.shared.lock();
            match inner.state {
                SessionState::Ready => {}
                SessionState::Streaming => {
                    tracing::warn!("generation rejected: session busy");
                    return Err(SessionError::Busy);
                }
                other => return Err(SessionError::NotReady(other)),
            }

            let id = inner.next_id;
            inner.next_id += 1;
            let cancel = CancellationToken::new();
            inner.generation = Some(ActiveGeneration {
                id,
                cancel: cancel.clone(),
            });
            self.shared.transition(&mut inner, SessionState::Streaming)?;
            (id, cancel)
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let stream = self.engine.generate(prompt);
        tokio::spawn(run_generation(
            Arc::clone(&self.shared),
            Arc::clone(&self.engine),
            id,
            stream,
            tx,
            cancel,
        ));

        Ok(rx)
    }

    /// Requests cooperative cancellation of the in-flight generation. No-op
    /// unless streaming.
    pub fn cancel(&self) {
        let inner = self.shared.lock();
        if inner.state.is_streaming() {
            if let Some(generation) = &inner.generation {
                tracing::debug!(id = generation.id, "cancelling generation");
                generation.cancel.cancel();
            }
        }
    }

    /// Cancels any in-flight generation or initialization and releases the
    /// engine. Safe to call repeatedly.
    pub fn close(&self) {
        let was_loaded = {
            let mut inner = self.shared.lock();
            if let Some(generation) = inner.generation.take() {
                generation.cancel.cancel();
            }
            if let Some(init) = inner.init.take() {
                init.cancel.cancel();
            }
            inner.config = None;
            if inner.state != SessionState::Uninitialized {
                self.shared.set_state(&mut inner, SessionState::Uninitialized);
            }
            std::mem::replace(&mut inner.loaded, false)
        };

        if was_loaded {
            self.engine.unload();
            tracing::info!("model released");
        }
    }
}

impl Drop for InferenceSession {
    fn drop(&mut self) {
        self.close();
    }
}

enum Outcome {
    Complete,
    Cancelled,
    Failed(EngineError),
}

async fn run_generation(
    shared: Arc<Shared>,
    engine: Arc<dyn Engine>,
    id: u64,
    mut stream: FragmentStream,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut final_text = String::new();

    let outcome = loop {
        // The next fragment is pulled only once the consumer took the previous one.
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Outcome::Cancelled,
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                // Nobody is listening any more.
                Err(_) => break Outcome::Cancelled,
            },
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Outcome::Cancelled,
            item = stream.next() => match item {
                None => break Outcome::Complete,
                Some(Err(error)) => break Outcome::Failed(error),
                Some(Ok(text)) => {
                    final_text.push_str(&text);
                    permit.send(SessionEvent::Fragment { text });
                }
            },
        }
    };
    drop(stream);

    let event = match outcome {
        Outcome::Complete => {
            let metrics = engine.metrics();
            let result = GenerationResult {
                final_text,
                tokens_per_second: metrics.tokens_per_second,
                elapsed_seconds: started.elapsed().as_secs_f64(),
                context_tokens_used: metrics.context_tokens_used,
            };
            tracing::info!(
                id,
                tokens_per_second = result.tokens_per_second,
                elapsed_seconds = result.elapsed_seconds,
                context_tokens_used = result.context_tokens_used,
                "generation complete"
            );
            SessionEvent::Complete { result }
        }
        Outcome::Cancelled => {
            tracing::info!(id, "generation cancelled");
            SessionEvent::Cancelled
        }
        Outcome::Failed(error) => {
            tracing::warn!(id, error = %error, "generation failed");
            SessionEvent::Error { error }
        }
    };

    shared.finish_generation(id, &event);
    let _ = tx.send(event).await;
}
