use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::store::SUMMARIES_FILE;

/// Everything the pipeline needs to know about its surroundings. Loaded
/// from a TOML file; every field has a default so a missing file or a
/// partial file still yields a runnable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the JSONL event logs.
    pub data_dir: PathBuf,
    /// Where extracted feature CSVs are written.
    pub features_dir: PathBuf,
    /// Where trained model artifacts are written.
    pub models_dir: PathBuf,
    /// Training state file.
    pub state_file: PathBuf,
    /// Sessions required before the first training pass.
    pub min_sessions_for_training: u64,
    /// New sessions required between training passes.
    pub retrain_interval: u64,
    /// Seconds between acting on change notifications in daemon mode.
    pub debounce_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            features_dir: PathBuf::from("ml/features"),
            models_dir: PathBuf::from("ml/models"),
            state_file: PathBuf::from("ml/.training_state.json"),
            min_sessions_for_training: 5,
            retrain_interval: 3,
            debounce_secs: 60,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.min_sessions_for_training == 0 {
            errors.push("min_sessions_for_training must be at least 1".to_string());
        }
        if self.retrain_interval == 0 {
            errors.push("retrain_interval must be at least 1".to_string());
        }
        if self.data_dir.as_os_str().is_empty() {
            errors.push("data_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn summaries_path(&self) -> PathBuf {
        self.data_dir.join(SUMMARIES_FILE)
    }
}
