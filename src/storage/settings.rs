use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::StorageError;

const SETTINGS_FILE: &str = "settings.json";

/// Small key-value state remembered between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub last_model_path: Option<PathBuf>,
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(SETTINGS_FILE),
        }
    }

    /// A missing file yields defaults; a corrupt one is reported.
    pub fn load(&self) -> Result<Settings, StorageError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn save(&self, settings: &Settings) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Database(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| StorageError::Database(e.to_string()))
    }

    pub fn remember_model(&self, model_path: &Path) -> Result<(), StorageError> {
        let mut settings = self.load().unwrap_or_default();
        settings.last_model_path = Some(model_path.to_path_buf());
        self.save(&settings)
    }
}
