use anyhow::Result;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::features::timing::TimingRecommendation;
use crate::features::{fill, session, spread, timing};
use crate::model::{
    ModelFit, TrainError, FILL_MIN_SAMPLES, FILL_MODEL_FILE, SPREAD_MIN_SAMPLES,
    SPREAD_MODEL_FILE, TIMING_FILE,
};
use crate::persist::atomic_write_json;
use crate::state::TrainingState;
use crate::store::EventStore;

/// Why a training pass will or will not run.
#[derive(Debug, PartialEq, Eq)]
pub enum RetrainDecision {
    NotEnoughSessions { total: u64, required: u64 },
    TooFewNewSessions { new_sessions: u64, interval: u64 },
    Retrain { total: u64, new_sessions: u64 },
}

/// What happened to one model target during a pass.
#[derive(Debug)]
pub enum TargetOutcome {
    Trained { samples: usize },
    Skipped(String),
    Failed(String),
}

impl std::fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetOutcome::Trained { samples } => write!(f, "trained on {} samples", samples),
            TargetOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            TargetOutcome::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug)]
pub struct TrainingPassReport {
    pub spread: TargetOutcome,
    pub fill: TargetOutcome,
    pub timing: TargetOutcome,
    pub sessions: u64,
}

impl TrainingPassReport {
    pub fn log(&self) {
        info!("spread: {}", self.spread);
        info!("fill: {}", self.fill);
        info!("timing: {}", self.timing);
        info!("models updated with {} sessions of data", self.sessions);
    }
}

/// Ties the stages together: reads the event logs, extracts feature tables,
/// fits models, and records what it trained on.
pub struct Orchestrator {
    config: PipelineConfig,
    trainer: Box<dyn ModelFit + Send + Sync>,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, trainer: Box<dyn ModelFit + Send + Sync>) -> Self {
        Self { config, trainer }
    }

    pub fn should_retrain(&self) -> Result<RetrainDecision> {
        let total = EventStore::count_sessions(&self.config.data_dir)?;

        if total < self.config.min_sessions_for_training {
            return Ok(RetrainDecision::NotEnoughSessions {
                total,
                required: self.config.min_sessions_for_training,
            });
        }

        let state = TrainingState::load(&self.config.state_file);
        let new_sessions = total.saturating_sub(state.last_trained_sessions);
        if new_sessions >= self.config.retrain_interval {
            Ok(RetrainDecision::Retrain {
                total,
                new_sessions,
            })
        } else {
            Ok(RetrainDecision::TooFewNewSessions {
                new_sessions,
                interval: self.config.retrain_interval,
            })
        }
    }

    /// Run a pass only if one is due. None means nothing needed doing.
    pub fn check_and_train(&self) -> Result<Option<TrainingPassReport>> {
        match self.should_retrain()? {
            RetrainDecision::NotEnoughSessions { total, required } => {
                info!("only {} sessions, need {} minimum", total, required);
                Ok(None)
            }
            RetrainDecision::TooFewNewSessions {
                new_sessions,
                interval,
            } => {
                info!(
                    "only {} new sessions, need {} to retrain",
                    new_sessions, interval
                );
                Ok(None)
            }
            RetrainDecision::Retrain {
                total,
                new_sessions,
            } => {
                info!(
                    "{} new sessions since last training ({} total), retraining",
                    new_sessions, total
                );
                self.run_pass().map(Some)
            }
        }
    }

    /// Run the full pipeline unconditionally: extract every table, fit
    /// every target, commit the state. A failed target does not abort the
    /// others.
    pub fn run_pass(&self) -> Result<TrainingPassReport> {
        info!("training pass started");
        let store = EventStore::load(&self.config.data_dir)?;

        let spread_table = spread::extract(&store.snapshots);
        spread_table.save(&self.config.features_dir)?;

        let fill_table = fill::extract(&store.orders, &store.fills, &store.snapshots);
        fill_table.save(&self.config.features_dir)?;

        let timing_table = timing::extract(&store.snapshots);
        timing_table.save(&self.config.features_dir)?;

        // Not consumed by any model yet, but materialized for analysis.
        let session_table = session::extract(&store.summaries);
        session_table.save(&self.config.features_dir)?;

        let spread_outcome = self.fit_target(
            &spread_table,
            spread::SPREAD_FEATURE_COLS,
            Some("spread_increased"),
            Some("future_spread"),
            SPREAD_MIN_SAMPLES,
            SPREAD_MODEL_FILE,
        );

        let fill_outcome = self.fit_target(
            &fill_table,
            fill::FILL_FEATURE_COLS,
            Some("was_filled"),
            None,
            FILL_MIN_SAMPLES,
            FILL_MODEL_FILE,
        );

        let timing_outcome = match TimingRecommendation::from_table(&timing_table) {
            Some(rec) => {
                let path = self.config.models_dir.join(TIMING_FILE);
                match atomic_write_json(&path, &rec) {
                    Ok(()) => {
                        info!(
                            "timing recommendation: minute {} (avg spread {:.2}%)",
                            rec.best_minute, rec.avg_spread
                        );
                        TargetOutcome::Trained {
                            samples: timing_table.len(),
                        }
                    }
                    Err(e) => {
                        error!("failed to write timing recommendation: {}", e);
                        TargetOutcome::Failed(e.to_string())
                    }
                }
            }
            None => {
                warn!("no minute bucket has enough samples, skipping timing");
                TargetOutcome::Skipped("no qualifying minute buckets".to_string())
            }
        };

        let sessions = EventStore::count_sessions(&self.config.data_dir)?;
        TrainingState::commit(&self.config.state_file, sessions)?;
        info!("training pass complete, {} sessions recorded", sessions);

        let fallbacks = crate::events::timestamp_fallback_count();
        if fallbacks > 0 {
            warn!("{} timestamps failed to parse and were replaced with the current time", fallbacks);
        }

        Ok(TrainingPassReport {
            spread: spread_outcome,
            fill: fill_outcome,
            timing: timing_outcome,
            sessions,
        })
    }

    fn fit_target(
        &self,
        table: &crate::features::FeatureTable,
        feature_cols: &[&str],
        class_target: Option<&str>,
        reg_target: Option<&str>,
        min_samples: usize,
        file_name: &str,
    ) -> TargetOutcome {
        match self
            .trainer
            .fit(table, feature_cols, class_target, reg_target, min_samples)
        {
            Ok(artifact) => {
                let path = self.config.models_dir.join(file_name);
                match artifact.save(&path) {
                    Ok(()) => TargetOutcome::Trained {
                        samples: artifact.samples,
                    },
                    Err(e) => {
                        error!("failed to save {} model: {}", table.name, e);
                        TargetOutcome::Failed(e.to_string())
                    }
                }
            }
            Err(e @ (TrainError::EmptyTable | TrainError::NotEnoughSamples { .. })) => {
                warn!("skipping {}: {}", table.name, e);
                TargetOutcome::Skipped(e.to_string())
            }
            Err(e) => {
                error!("training {} failed: {}", table.name, e);
                TargetOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GradientTrainer, ModelArtifact};
    use std::fs;
    use std::path::Path;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: dir.join("data"),
            features_dir: dir.join("features"),
            models_dir: dir.join("models"),
            state_file: dir.join("state.json"),
            ..PipelineConfig::default()
        }
    }

    fn orchestrator_in(dir: &Path) -> Orchestrator {
        Orchestrator::new(config_in(dir), Box::new(GradientTrainer::default()))
    }

    fn write_summaries(data_dir: &Path, count: usize) {
        fs::create_dir_all(data_dir).unwrap();
        let mut lines = String::new();
        for i in 0..count {
            lines.push_str(&format!(
                "{{\"session_id\":\"s{}\",\"market_id\":\"m1\",\"start_time\":\"2024-03-01T12:00:00Z\",\"locked_profit\":0.1,\"total_cost\":10.0}}\n",
                i
            ));
        }
        fs::write(data_dir.join("summaries.jsonl"), lines).unwrap();
    }

    #[test]
    fn test_not_enough_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator_in(dir.path());
        write_summaries(&dir.path().join("data"), 4);

        assert_eq!(
            orch.should_retrain().unwrap(),
            RetrainDecision::NotEnoughSessions {
                total: 4,
                required: 5
            }
        );
        assert!(orch.check_and_train().unwrap().is_none());
    }

    #[test]
    fn test_retrains_once_threshold_met() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator_in(dir.path());
        write_summaries(&dir.path().join("data"), 5);

        assert_eq!(
            orch.should_retrain().unwrap(),
            RetrainDecision::Retrain {
                total: 5,
                new_sessions: 5
            }
        );
    }

    #[test]
    fn test_interval_gates_subsequent_passes() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator_in(dir.path());

        // Trained at 5 sessions; 7 total is only 2 new, 8 is 3.
        write_summaries(&dir.path().join("data"), 5);
        orch.run_pass().unwrap();

        write_summaries(&dir.path().join("data"), 7);
        assert_eq!(
            orch.should_retrain().unwrap(),
            RetrainDecision::TooFewNewSessions {
                new_sessions: 2,
                interval: 3
            }
        );

        write_summaries(&dir.path().join("data"), 8);
        assert_eq!(
            orch.should_retrain().unwrap(),
            RetrainDecision::Retrain {
                total: 8,
                new_sessions: 3
            }
        );
    }

    #[test]
    fn test_pass_with_sparse_data_skips_models_but_commits_state() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator_in(dir.path());
        write_summaries(&dir.path().join("data"), 5);

        let report = orch.run_pass().unwrap();
        assert!(matches!(report.spread, TargetOutcome::Skipped(_)));
        assert!(matches!(report.fill, TargetOutcome::Skipped(_)));
        assert!(matches!(report.timing, TargetOutcome::Skipped(_)));
        assert_eq!(report.sessions, 5);

        let state = TrainingState::load(&dir.path().join("state.json"));
        assert_eq!(state.last_trained_sessions, 5);
    }

    #[test]
    fn test_pass_trains_fill_model_with_enough_rows() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator_in(dir.path());
        let data_dir = dir.path().join("data");
        write_summaries(&data_dir, 5);

        // One snapshot plus 60 orders at alternating price levels; half of
        // them have a matching fill.
        let mut snaps = String::new();
        snaps.push_str("{\"market_id\":\"m1\",\"timestamp\":\"2024-03-01T12:00:00Z\",\"end_time\":\"2024-03-01T12:15:00Z\",\"spread_pct\":3.0,\"up_best_ask\":0.5,\"down_best_ask\":0.46}\n");
        fs::write(data_dir.join("snapshots_s0.jsonl"), snaps).unwrap();

        let mut orders = String::new();
        for i in 0..60 {
            let price = if i % 2 == 0 { 0.40 } else { 0.48 };
            orders.push_str(&format!(
                "{{\"market_id\":\"m1\",\"timestamp\":\"2024-03-01T12:00:{:02}Z\",\"side\":\"UP\",\"price\":{}}}\n",
                i % 50, price
            ));
        }
        fs::write(data_dir.join("orders_s0.jsonl"), orders).unwrap();
        fs::write(
            data_dir.join("fills_s0.jsonl"),
            "{\"market_id\":\"m1\",\"timestamp\":\"2024-03-01T12:01:00Z\",\"side\":\"UP\",\"price\":0.48}\n",
        )
        .unwrap();

        let report = orch.run_pass().unwrap();
        assert!(matches!(report.fill, TargetOutcome::Trained { samples: 60 }));

        let artifact = ModelArtifact::load(&dir.path().join("models/fill_predictor.json"))
            .unwrap()
            .unwrap();
        assert!(artifact.classifier.is_some());
        assert!(dir.path().join("features/fill_features.csv").exists());
    }
}
