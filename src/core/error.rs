use thiserror::Error;

use crate::core::session::SessionState;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Model file error: {0}")]
    ModelFile(#[from] ModelFileError),

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone)]
pub enum SessionError {
    #[error("A generation is already in progress")]
    Busy,

    #[error("Session is not ready (state: {0})")]
    NotReady(SessionState),

    #[error("Initialization failed: {0}")]
    InitFailed(EngineError),

    #[error("Initialization was cancelled")]
    InitCancelled,

    #[error("Illegal session transition: {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("No model is loaded")]
    NotLoaded,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    File(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum ModelFileError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Not a GGUF file (magic bytes {0:02x?})")]
    BadMagic(Vec<u8>),

    #[error("Malformed GGUF metadata: {0}")]
    Metadata(String),
}

impl From<std::io::Error> for ModelFileError {
    fn from(e: std::io::Error) -> Self {
        ModelFileError::Io(e.to_string())
    }
}
