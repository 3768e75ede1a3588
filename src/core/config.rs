use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::ConfigError;
use crate::core::session::SessionConfig;

/// Default llama.cpp server endpoint
const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8080";

/// Which engine backend drives generation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    #[default]
    LlamaServer,
    Scripted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Model to load at startup (falls back to the last one remembered in settings)
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub sampling: SamplingConfig,

    #[serde(default)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            data_dir: default_data_dir(),
            model_path: None,
            engine: EngineConfig::default(),
            sampling: SamplingConfig::default(),
            debug: false,
        }
    }
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_data_dir() -> String {
    ".nl-ledger".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub kind: EngineKind,

    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Replies replayed in order by the scripted engine
    #[serde(default)]
    pub scripted_replies: Vec<String>,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::default(),
            server_url: default_server_url(),
            timeout_secs: default_timeout_secs(),
            scripted_replies: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_min_p")]
    pub min_p: f32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_context_size")]
    pub context_size: i64,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_true")]
    pub use_mmap: bool,
    #[serde(default)]
    pub use_mlock: bool,
    #[serde(default)]
    pub store_history: bool,
}

fn default_min_p() -> f32 {
    0.05
}

fn default_temperature() -> f32 {
    1.5
}

fn default_context_size() -> i64 {
    2048
}

/// Leave two cores to the rest of the system.
fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(2))
        .unwrap_or(1)
        .max(1)
}

fn default_true() -> bool {
    true
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            min_p: default_min_p(),
            temperature: default_temperature(),
            context_size: default_context_size(),
            threads: default_threads(),
            use_mmap: true,
            use_mlock: false,
            store_history: false,
        }
    }
}

pub fn load_config(working_dir: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let wd = working_dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    let mut config = AppConfig {
        working_dir: wd.clone(),
        ..Default::default()
    };

    // Global config
    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("nl-ledger").join("config.json");
        if let Some(file_config) = read_config_file(&global_path)? {
            merge_config(&mut config, file_config);
        }
    }

    // Project config
    if let Some(file_config) = read_config_file(&wd.join("nl-ledger.json"))? {
        merge_config(&mut config, file_config);
    }

    apply_env(&mut config);

    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Option<AppConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::File(format!("{}: {e}", path.display())))?;
    let parsed = serde_json::from_str(&content)
        .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(Some(parsed))
}

fn merge_config(base: &mut AppConfig, overlay: AppConfig) {
    if overlay.data_dir != default_data_dir() {
        base.data_dir = overlay.data_dir;
    }
    if overlay.model_path.is_some() {
        base.model_path = overlay.model_path;
    }
    if overlay.engine.kind != EngineKind::default() {
        base.engine.kind = overlay.engine.kind;
    }
    if overlay.engine.server_url != default_server_url() {
        base.engine.server_url = overlay.engine.server_url;
    }
    if overlay.engine.timeout_secs != default_timeout_secs() {
        base.engine.timeout_secs = overlay.engine.timeout_secs;
    }
    if !overlay.engine.scripted_replies.is_empty() {
        base.engine.scripted_replies = overlay.engine.scripted_replies;
    }
    let sampling = overlay.sampling;
    if sampling.min_p != default_min_p() {
        base.sampling.min_p = sampling.min_p;
    }
    if sampling.temperature != default_temperature() {
        base.sampling.temperature = sampling.temperature;
    }
    if sampling.context_size != default_context_size() {
        base.sampling.context_size = sampling.context_size;
    }
    if sampling.threads != default_threads() {
        base.sampling.threads = sampling.threads;
    }
    if !sampling.use_mmap {
        base.sampling.use_mmap = false;
    }
    if sampling.use_mlock {
        base.sampling.use_mlock = true;
    }
    if sampling.store_history {
        base.sampling.store_history = true;
    }
    if overlay.debug {
        base.debug = true;
    }
}

fn apply_env(config: &mut AppConfig) {
    if let Ok(path) = std::env::var("NL_LEDGER_MODEL") {
        if !path.is_empty() {
            config.model_path = Some(PathBuf::from(path));
        }
    }
    if let Ok(url) = std::env::var("NL_LEDGER_SERVER_URL") {
        if !url.is_empty() {
            config.engine.server_url = url;
        }
    }
}

impl AppConfig {
    pub fn data_path(&self) -> PathBuf {
        self.working_dir.join(&self.data_dir)
    }

    pub fn models_path(&self) -> PathBuf {
        self.data_path().join("models")
    }

    pub fn session_config(&self, model_path: PathBuf, chat_template: String) -> SessionConfig {
        SessionConfig {
            model_path,
            min_p: self.sampling.min_p,
            temperature: self.sampling.temperature,
            context_size: self.sampling.context_size,
            chat_template,
            thread_count: self.sampling.threads,
            use_memory_map: self.sampling.use_mmap,
            use_memory_lock: self.sampling.use_mlock,
            store_history: self.sampling.store_history,
        }
    }
}
