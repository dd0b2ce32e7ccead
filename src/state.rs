use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::persist::atomic_write_json;

/// What the last completed training pass saw. Drives the decision of when
/// the next pass is due.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    #[serde(default)]
    pub last_trained_sessions: u64,
    #[serde(default)]
    pub last_trained_time: Option<DateTime<Utc>>,
}

impl TrainingState {
    /// Load the state file. Missing or unreadable state means "never
    /// trained", which only makes retraining happen sooner.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path).map_err(anyhow::Error::from).and_then(|content| {
            serde_json::from_str(&content).map_err(anyhow::Error::from)
        }) {
            Ok(state) => state,
            Err(e) => {
                warn!("unreadable training state at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Record a completed pass. The session counter never moves backwards,
    /// even if summary lines were deleted out from under us.
    pub fn commit(path: &Path, sessions: u64) -> Result<Self> {
        let prev = Self::load(path);
        let state = Self {
            last_trained_sessions: prev.last_trained_sessions.max(sessions),
            last_trained_time: Some(Utc::now()),
        };
        atomic_write_json(path, &state)?;
        Ok(state)
    }
}
