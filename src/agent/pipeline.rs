use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use crate::agent::aggregator::StreamAggregator;
use crate::agent::event::SessionEvent;
use crate::agent::executor::{ExecutionResult, IntentExecutor, Outcome};
use crate::agent::interpreter::interpret;
use crate::agent::prompt;
use crate::agent::session::InferenceSession;
use crate::core::command::Command;
use crate::core::config::AppConfig;
use crate::core::engine::Engine;
use crate::core::error::{LedgerError, ModelFileError, SessionError};
use crate::core::ledger::LedgerStore;
use crate::core::session::{GenerationResult, SessionState};
use crate::engine::gguf;
use crate::storage::SettingsStore;

pub const CANCELLED_TEXT: &str = "Inference cancelled.";
pub const BUSY_TEXT: &str = "Inference in progress, please wait.";

/// The single status value observers render.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    Idle,
    Loading,
    Processing,
    Message(String),
    Error(String),
}

/// How one `submit` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Rejected because a generation was already running.
    Busy,
    Executed {
        command: Command,
        result: ExecutionResult,
    },
    Cancelled,
    Failed(String),
}

/// Owns the session and the executor, and turns user text into ledger
/// operations. Observers read `status` and `partial` through watch channels
/// and never touch the engine.
pub struct CommandPipeline {
    config: AppConfig,
    session: InferenceSession,
    executor: IntentExecutor,
    store: Arc<dyn LedgerStore>,
    settings: Option<SettingsStore>,
    status: watch::Sender<PipelineStatus>,
    partial: watch::Sender<String>,
    last_generation: watch::Sender<Option<GenerationResult>>,
}

impl CommandPipeline {
    pub fn new(config: AppConfig, engine: Arc<dyn Engine>, store: Arc<dyn LedgerStore>) -> Self {
        let (status, _) = watch::channel(PipelineStatus::Idle);
        let (partial, _) = watch::channel(String::new());
        let (last_generation, _) = watch::channel(None);
        Self {
            config,
            session: InferenceSession::new(engine),
            executor: IntentExecutor::new(Arc::clone(&store)),
            store,
            settings: None,
            status,
            partial,
            last_generation,
        }
    }

    /// Remember successfully loaded models in this settings file.
    pub fn with_settings(mut self, settings: SettingsStore) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    pub fn partial(&self) -> String {
        self.partial.borrow().clone()
    }

    pub fn subscribe_partial(&self) -> watch::Receiver<String> {
        self.partial.subscribe()
    }

    pub fn last_generation(&self) -> Option<GenerationResult> {
        self.last_generation.borrow().clone()
    }

    pub fn subscribe_last_generation(&self) -> watch::Receiver<Option<GenerationResult>> {
        self.last_generation.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn session(&self) -> &InferenceSession {
        &self.session
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn load_model(&self, model_path: &Path) -> Result<(), LedgerError> {
        self.status.send_replace(PipelineStatus::Loading);

        let path = model_path.to_path_buf();
        let template = tokio::task::spawn_blocking(move || gguf::read_chat_template(&path))
            .await
            .unwrap_or_else(|e| Err(ModelFileError::Io(e.to_string())));
        let chat_template = match template {
            Ok(template) => template.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "could not read chat template");
                String::new()
            }
        };
        let session_config = self
            .config
            .session_config(model_path.to_path_buf(), chat_template);

        if let Err(e) = self.session.initialize(session_config).await {
            self.status
                .send_replace(PipelineStatus::Error(format!("Failed to initialize model: {e}")));
            return Err(e.into());
        }

        if let Some(settings) = &self.settings {
            if let Err(e) = settings.remember_model(model_path) {
                tracing::warn!(error = %e, "could not remember model path");
            }
        }
        self.status.send_replace(PipelineStatus::Idle);
        Ok(())
    }

    /// Runs one request end to end: prompt, generation, interpretation and
    /// execution. Rejected immediately while another request is streaming.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        if self.session.state().is_streaming() {
            self.status
                .send_replace(PipelineStatus::Message(BUSY_TEXT.to_string()));
            return SubmitOutcome::Busy;
        }

        let mut events = match self.session.generate(prompt::compile(text)) {
            Ok(rx) => rx,
            Err(SessionError::Busy) => {
                self.status
                    .send_replace(PipelineStatus::Message(BUSY_TEXT.to_string()));
                return SubmitOutcome::Busy;
            }
            Err(e) => {
                let message = e.to_string();
                self.status.send_replace(PipelineStatus::Error(message.clone()));
                return SubmitOutcome::Failed(message);
            }
        };

        self.status.send_replace(PipelineStatus::Processing);
        let mut aggregator = StreamAggregator::new();
        self.partial.send_replace(String::new());

        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Fragment { text: fragment } => {
                    if aggregator.push(&fragment) {
                        self.partial.send_replace(aggregator.buffer().to_string());
                    }
                }
                SessionEvent::Complete { result } => {
                    let final_text = result.final_text.clone();
                    self.last_generation.send_replace(Some(result));
                    self.partial.send_replace(final_text.clone());
                    return self.finish(text, &final_text).await;
                }
                SessionEvent::Cancelled => {
                    self.partial.send_replace(CANCELLED_TEXT.to_string());
                    self.status.send_replace(PipelineStatus::Idle);
                    return SubmitOutcome::Cancelled;
                }
                SessionEvent::Error { error } => {
                    let message = format!("Model error: {error}");
                    self.partial.send_replace(message.clone());
                    self.status.send_replace(PipelineStatus::Error(message.clone()));
                    return SubmitOutcome::Failed(message);
                }
            }
        }

        let message = "Generation ended without a result".to_string();
        self.status.send_replace(PipelineStatus::Error(message.clone()));
        SubmitOutcome::Failed(message)
    }

    async fn finish(&self, user_text: &str, final_text: &str) -> SubmitOutcome {
        let command = interpret(final_text, user_text);
        let result = self.executor.execute(command.clone()).await;

        self.partial.send_replace(result.detail.clone());
        let status = match result.outcome {
            Outcome::Done => PipelineStatus::Idle,
            Outcome::Reply => PipelineStatus::Message(result.message.clone()),
            Outcome::Failed => PipelineStatus::Error(result.message.clone()),
        };
        self.status.send_replace(status);

        SubmitOutcome::Executed { command, result }
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    pub fn close(&self) {
        self.session.close();
        self.status.send_replace(PipelineStatus::Idle);
    }
}

impl Drop for CommandPipeline {
    fn drop(&mut self) {
        self.session.close();
    }
}
