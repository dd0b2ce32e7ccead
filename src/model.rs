use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::features::FeatureTable;
use crate::persist::atomic_write_json;

pub const SPREAD_MODEL_FILE: &str = "spread_predictor.json";
pub const FILL_MODEL_FILE: &str = "fill_predictor.json";
pub const TIMING_FILE: &str = "timing_recommendations.json";

/// Minimum rows before the spread models are worth fitting.
pub const SPREAD_MIN_SAMPLES: usize = 100;
/// Minimum rows before the fill model is worth fitting.
pub const FILL_MIN_SAMPLES: usize = 50;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("feature table is empty")]
    EmptyTable,
    #[error("not enough samples: {got} < {need}")]
    NotEnoughSamples { got: usize, need: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-column z-score normalization fitted on the training matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl Scaler {
    fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows() as f64;
        let mut means = Vec::with_capacity(x.ncols());
        let mut stds = Vec::with_capacity(x.ncols());
        for col in x.columns() {
            let mean = col.sum() / n;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means.push(mean);
            stds.push(var.sqrt());
        }
        Self { means, stds }
    }

    /// Scale one feature vector. Constant columns map to 0.
    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (mean, std))| {
                if *std > 1e-10 {
                    (v - mean) / std
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn transform_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (mut col, (mean, std)) in out.columns_mut().into_iter().zip(self.means.iter().zip(&self.stds)) {
            if *std > 1e-10 {
                col.mapv_inplace(|v| (v - mean) / std);
            } else {
                col.fill(0.0);
            }
        }
        out
    }
}

/// A fitted linear decision boundary or regression line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearWeights {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl LinearWeights {
    fn score(&self, features: &[f64]) -> f64 {
        self.coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// A trained model for one target: scaler, optional classifier, optional
/// regressor, and the feature schema they expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub target: String,
    pub feature_cols: Vec<String>,
    pub scaler: Scaler,
    pub classifier: Option<LinearWeights>,
    pub regressor: Option<LinearWeights>,
    pub trained_at: DateTime<Utc>,
    pub samples: usize,
}

impl ModelArtifact {
    /// Assemble the input vector in schema order, missing fields as 0.
    pub fn vector_from(&self, features: &HashMap<String, f64>) -> Vec<f64> {
        self.feature_cols
            .iter()
            .map(|col| features.get(col).copied().unwrap_or(0.0))
            .collect()
    }

    /// Binary decision plus positive-class probability.
    pub fn classify(&self, features: &HashMap<String, f64>) -> Option<(bool, f64)> {
        let weights = self.classifier.as_ref()?;
        let x = self.scaler.transform(&self.vector_from(features));
        let prob = sigmoid(weights.score(&x));
        Some((prob >= 0.5, prob))
    }

    /// Predicted continuous target value.
    pub fn regress(&self, features: &HashMap<String, f64>) -> Option<f64> {
        let weights = self.regressor.as_ref()?;
        let x = self.scaler.transform(&self.vector_from(features));
        Some(weights.score(&x))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        atomic_write_json(path, self)?;
        info!("saved {} model to {}", self.target, path.display());
        Ok(())
    }

    /// Load a previously saved artifact. A missing file is None, not an
    /// error.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

/// Seam between the orchestrator and the fitting algorithm.
pub trait ModelFit {
    fn fit(
        &self,
        table: &FeatureTable,
        feature_cols: &[&str],
        class_target: Option<&str>,
        reg_target: Option<&str>,
        min_samples: usize,
    ) -> Result<ModelArtifact, TrainError>;
}

/// Full-batch gradient descent: logistic loss for classification targets,
/// squared loss for regression targets, L2 on the coefficients.
pub struct GradientTrainer {
    pub max_iter: usize,
    pub learning_rate: f64,
    pub l2_lambda: f64,
}

impl Default for GradientTrainer {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            learning_rate: 0.01,
            l2_lambda: 0.01,
        }
    }
}

impl GradientTrainer {
    fn matrix_from(table: &FeatureTable, feature_cols: &[&str]) -> Array2<f64> {
        let rows = table.len();
        let cols = feature_cols.len();
        let mut x = Array2::zeros((rows, cols));
        for (i, row) in table.rows.iter().enumerate() {
            for (j, col) in feature_cols.iter().enumerate() {
                x[[i, j]] = row.get_f64(col);
            }
        }
        x
    }

    fn fit_logistic(&self, x: &Array2<f64>, y: &Array1<f64>) -> LinearWeights {
        let n = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut intercept = 0.0;

        for _ in 0..self.max_iter {
            let z = x.dot(&weights) + intercept;
            let preds = z.mapv(sigmoid);
            let errors = &preds - y;

            let grad_w = x.t().dot(&errors) / n + self.l2_lambda * &weights;
            let grad_b = errors.sum() / n;

            weights = weights - self.learning_rate * grad_w;
            intercept -= self.learning_rate * grad_b;
        }

        LinearWeights {
            coefficients: weights.to_vec(),
            intercept,
        }
    }

    fn fit_linear(&self, x: &Array2<f64>, y: &Array1<f64>) -> LinearWeights {
        let n = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut intercept = 0.0;

        for _ in 0..self.max_iter {
            let preds = x.dot(&weights) + intercept;
            let errors = &preds - y;

            let grad_w = x.t().dot(&errors) / n + self.l2_lambda * &weights;
            let grad_b = errors.sum() / n;

            weights = weights - self.learning_rate * grad_w;
            intercept -= self.learning_rate * grad_b;
        }

        LinearWeights {
            coefficients: weights.to_vec(),
            intercept,
        }
    }

    fn training_accuracy(x: &Array2<f64>, y: &Array1<f64>, weights: &LinearWeights) -> f64 {
        let mut correct = 0usize;
        for (row, label) in x.rows().into_iter().zip(y.iter()) {
            let prob = sigmoid(
                row.iter()
                    .zip(&weights.coefficients)
                    .map(|(x, w)| x * w)
                    .sum::<f64>()
                    + weights.intercept,
            );
            if (prob >= 0.5) == (*label >= 0.5) {
                correct += 1;
            }
        }
        correct as f64 / x.nrows() as f64
    }
}

impl ModelFit for GradientTrainer {
    fn fit(
        &self,
        table: &FeatureTable,
        feature_cols: &[&str],
        class_target: Option<&str>,
        reg_target: Option<&str>,
        min_samples: usize,
    ) -> Result<ModelArtifact, TrainError> {
        if table.is_empty() {
            return Err(TrainError::EmptyTable);
        }
        if table.len() < min_samples {
            return Err(TrainError::NotEnoughSamples {
                got: table.len(),
                need: min_samples,
            });
        }

        let x_raw = Self::matrix_from(table, feature_cols);
        let scaler = Scaler::fit(&x_raw);
        let x = scaler.transform_matrix(&x_raw);

        let classifier = class_target.map(|target| {
            let y = Array1::from_vec(table.column(target));
            let weights = self.fit_logistic(&x, &y);
            let accuracy = Self::training_accuracy(&x, &y, &weights);
            info!(
                "fitted {} classifier on {} samples, training accuracy {:.3}",
                table.name,
                table.len(),
                accuracy
            );
            weights
        });

        let regressor = reg_target.map(|target| {
            let y = Array1::from_vec(table.column(target));
            let weights = self.fit_linear(&x, &y);
            info!(
                "fitted {} regressor on {} samples",
                table.name,
                table.len()
            );
            weights
        });

        Ok(ModelArtifact {
            target: table.name.to_string(),
            feature_cols: feature_cols.iter().map(|c| c.to_string()).collect(),
            scaler,
            classifier,
            regressor,
            trained_at: Utc::now(),
            samples: table.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureRow;

    const COLS: &[&str] = &["a", "b", "label", "value"];

    fn table(rows: usize) -> FeatureTable {
        let mut table = FeatureTable::new("test_features", COLS);
        for i in 0..rows {
            // Label is separable on `a`; value is a linear function of it.
            let a = if i % 2 == 0 { 1.0 } else { -1.0 };
            let mut row = FeatureRow::new();
            row.put_f64("a", a)
                .put_f64("b", (i % 7) as f64)
                .put_i64("label", if a > 0.0 { 1 } else { 0 })
                .put_f64("value", 2.0 * a + 1.0);
            table.push(row);
        }
        table
    }

    #[test]
    fn test_empty_table_rejected() {
        let trainer = GradientTrainer::default();
        let empty = FeatureTable::new("test_features", COLS);
        assert!(matches!(
            trainer.fit(&empty, &["a", "b"], Some("label"), None, 10),
            Err(TrainError::EmptyTable)
        ));
    }

    #[test]
    fn test_min_samples_enforced() {
        let trainer = GradientTrainer::default();
        let result = trainer.fit(&table(9), &["a", "b"], Some("label"), None, 10);
        assert!(matches!(
            result,
            Err(TrainError::NotEnoughSamples { got: 9, need: 10 })
        ));
    }

    #[test]
    fn test_separable_data_classifies() {
        let trainer = GradientTrainer::default();
        let artifact = trainer
            .fit(&table(40), &["a", "b"], Some("label"), None, 10)
            .unwrap();

        let mut positive = HashMap::new();
        positive.insert("a".to_string(), 1.0);
        positive.insert("b".to_string(), 3.0);
        let (decision, prob) = artifact.classify(&positive).unwrap();
        assert!(decision);
        assert!(prob > 0.5);

        let mut negative = HashMap::new();
        negative.insert("a".to_string(), -1.0);
        negative.insert("b".to_string(), 3.0);
        let (decision, prob) = artifact.classify(&negative).unwrap();
        assert!(!decision);
        assert!(prob < 0.5);
    }

    #[test]
    fn test_regression_tracks_linear_target() {
        let trainer = GradientTrainer::default();
        let artifact = trainer
            .fit(&table(40), &["a", "b"], None, Some("value"), 10)
            .unwrap();

        let mut features = HashMap::new();
        features.insert("a".to_string(), 1.0);
        features.insert("b".to_string(), 3.0);
        let predicted = artifact.regress(&features).unwrap();
        assert!((predicted - 3.0).abs() < 0.5, "predicted {}", predicted);

        assert!(artifact.classify(&features).is_none());
    }

    #[test]
    fn test_missing_features_default_to_zero() {
        let trainer = GradientTrainer::default();
        let artifact = trainer
            .fit(&table(40), &["a", "b"], Some("label"), None, 10)
            .unwrap();
        let vec = artifact.vector_from(&HashMap::new());
        assert_eq!(vec, vec![0.0, 0.0]);

        // Partial request: present fields land in schema order, absent
        // fields become 0 rather than failing.
        let mut partial = HashMap::new();
        partial.insert("b".to_string(), 4.0);
        assert_eq!(artifact.vector_from(&partial), vec![0.0, 4.0]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let trainer = GradientTrainer::default();
        let artifact = trainer
            .fit(&table(40), &["a", "b"], Some("label"), Some("value"), 10)
            .unwrap();
        artifact.save(&path).unwrap();

        let loaded = ModelArtifact::load(&path).unwrap().unwrap();
        assert_eq!(loaded.feature_cols, artifact.feature_cols);
        assert_eq!(loaded.samples, 40);
        assert!(loaded.classifier.is_some());
        assert!(loaded.regressor.is_some());
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelArtifact::load(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_constant_column_scales_to_zero() {
        let scaler = Scaler {
            means: vec![5.0],
            stds: vec![0.0],
        };
        assert_eq!(scaler.transform(&[5.0]), vec![0.0]);
        assert_eq!(scaler.transform(&[123.0]), vec![0.0]);
    }
}
