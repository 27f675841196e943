//! SmartCore ML Model Wrapper
//!
//! Wraps SmartCore's RandomForestRegressor behind [`Regressor`] and persists
//! it, together with its metadata, as a single bincode artifact.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use tracing::info;

use super::training::calculate_metrics;
use super::{FeatureMatrix, ModelMetadata, Regressor};
use crate::config::TrainingConfig;
use crate::domain::Signal;
use crate::error::{PipelineError, Result};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct SmartcoreRandomForest {
    pub metadata: ModelMetadata,
    model: Forest,
    /// Training parameters for reproducibility
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub seed: u64,
}

impl SmartcoreRandomForest {
    pub fn parameters(config: &TrainingConfig) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            min_samples_split: config.min_samples_split,
            n_trees: config.n_trees,
            m: None, // Use sqrt(n_features) by default
            keep_samples: false,
            seed: config.seed,
        }
    }

    /// Fit a forest. `metadata.validation_metrics` holds in-sample metrics
    /// until the caller replaces them with held-out ones.
    pub fn train(
        x: &[Vec<f64>],
        y: &[f64],
        params: RandomForestRegressorParameters,
        target: Signal,
        feature_names: Vec<String>,
    ) -> Result<Self> {
        if x.is_empty() || y.is_empty() {
            return Err(PipelineError::Model("cannot train on an empty dataset".into()));
        }
        if x.len() != y.len() {
            return Err(PipelineError::Model(format!(
                "feature and target count mismatch: {} rows, {} targets",
                x.len(),
                y.len()
            )));
        }

        let n_trees = params.n_trees;
        let max_depth = params.max_depth;
        let seed = params.seed;

        let x_matrix = dense(x, feature_names.len())?;
        let model = Forest::fit(&x_matrix, &y.to_vec(), params)
            .map_err(|e| PipelineError::Model(format!("random forest training failed: {e:?}")))?;

        let fitted = model
            .predict(&x_matrix)
            .map_err(|e| {
                PipelineError::Model(format!("prediction failed during validation: {e:?}"))
            })?;
        let metrics = calculate_metrics(&fitted, y)?;

        let metadata = ModelMetadata {
            model_id: format!("smartcore_rf_{}_{}", target, uuid::Uuid::new_v4()),
            target,
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: chrono::Utc::now(),
            training_samples: x.len(),
            validation_metrics: metrics,
            feature_names,
        };

        Ok(Self {
            metadata,
            model,
            n_trees,
            max_depth,
            seed,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let bytes = bincode::serialize(self)
            .map_err(|e| PipelineError::Model(format!("failed to serialize model: {e}")))?;
        fs::write(path, bytes).map_err(|e| PipelineError::io(path, e))?;
        info!(path = %path.display(), model_id = %self.metadata.model_id, "saved model");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
        let model: Self = bincode::deserialize(&bytes).map_err(|e| {
            PipelineError::Model(format!(
                "failed to deserialize model {}: {e}",
                path.display()
            ))
        })?;
        info!(
            path = %path.display(),
            model_id = %model.metadata.model_id,
            target = %model.metadata.target,
            "loaded model"
        );
        Ok(model)
    }
}

impl Regressor for SmartcoreRandomForest {
    fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        if features.columns() != self.feature_names() {
            return Err(PipelineError::Configuration(format!(
                "matrix columns [{}] do not match the model's features [{}]",
                features.columns().join(", "),
                self.feature_names().join(", ")
            )));
        }
        if features.is_empty() {
            return Ok(Vec::new());
        }

        let x = dense(features.rows(), features.n_features())?;
        self.model
            .predict(&x)
            .map_err(|e| PipelineError::Model(format!("prediction failed: {e:?}")))
    }
}

fn dense(rows: &[Vec<f64>], n_features: usize) -> Result<DenseMatrix<f64>> {
    let mut flat = Vec::with_capacity(rows.len() * n_features);
    for row in rows {
        if row.len() != n_features {
            return Err(PipelineError::Model(
                "all feature vectors must have the same length".into(),
            ));
        }
        flat.extend_from_slice(row);
    }
    Ok(DenseMatrix::new(rows.len(), n_features, flat, false))
}
