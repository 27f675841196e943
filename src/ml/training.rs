//! ML Model Training Pipeline
//!
//! Builds a supervised dataset from a [`FeatureTable`], splits it in time,
//! fits a random forest and scores it on the held-out tail.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::smartcore::SmartcoreRandomForest;
use super::{RowKey, ValidationMetrics};
use crate::config::TrainingConfig;
use crate::domain::Signal;
use crate::error::{PipelineError, Result};
use crate::features::FeatureTable;
use crate::ml::Regressor;

/// Held-out quality below which training still succeeds but logs a warning.
const MAX_MAPE: f64 = 20.0;
const MIN_R2: f64 = 0.5;

/// Training Dataset
#[derive(Debug, Clone)]
pub struct TrainingDataset {
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
    pub keys: Vec<RowKey>,
}

impl TrainingDataset {
    pub fn new(
        feature_names: Vec<String>,
        features: Vec<Vec<f64>>,
        targets: Vec<f64>,
        keys: Vec<RowKey>,
    ) -> Result<Self> {
        if features.len() != targets.len() || features.len() != keys.len() {
            return Err(PipelineError::Model(format!(
                "dataset shape mismatch: {} feature rows, {} targets, {} keys",
                features.len(),
                targets.len(),
                keys.len()
            )));
        }
        Ok(Self {
            feature_names,
            features,
            targets,
            keys,
        })
    }

    /// Rows of `table` with every input present, ordered by (date, site) so
    /// that [`split`](Self::split) separates past from future.
    pub fn from_table(table: &FeatureTable, inputs: &[String], target: Signal) -> Result<Self> {
        let matrix = table.to_matrix(inputs)?;

        let mut samples: Vec<(RowKey, Vec<f64>, f64)> = matrix
            .keys()
            .iter()
            .zip(matrix.rows())
            .zip(table.rows())
            .filter(|((_, row), _)| row.iter().all(|v| v.is_finite()))
            .map(|((key, row), feature_row)| {
                (key.clone(), row.clone(), feature_row.record.value(target))
            })
            .collect();

        let skipped = matrix.len() - samples.len();
        if skipped > 0 {
            info!(
                skipped,
                target = %target,
                "dropped rows with incomplete features from training set"
            );
        }

        samples.sort_by(|a, b| {
            a.0.date
                .cmp(&b.0.date)
                .then_with(|| a.0.site_id.cmp(&b.0.site_id))
        });

        let mut keys = Vec::with_capacity(samples.len());
        let mut features = Vec::with_capacity(samples.len());
        let mut targets = Vec::with_capacity(samples.len());
        for (key, row, y) in samples {
            keys.push(key);
            features.push(row);
            targets.push(y);
        }
        Self::new(inputs.to_vec(), features, targets, keys)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Split dataset into training and validation sets, preserving order.
    pub fn split(&self, train_ratio: f64) -> Result<(TrainingDataset, TrainingDataset)> {
        if train_ratio <= 0.0 || train_ratio >= 1.0 {
            return Err(PipelineError::Model(
                "train ratio must be between 0 and 1".into(),
            ));
        }

        let split_idx = (self.len() as f64 * train_ratio).floor() as usize;
        let part = |range: std::ops::Range<usize>| TrainingDataset {
            feature_names: self.feature_names.clone(),
            features: self.features[range.clone()].to_vec(),
            targets: self.targets[range.clone()].to_vec(),
            keys: self.keys[range].to_vec(),
        };

        Ok((part(0..split_idx), part(split_idx..self.len())))
    }
}

/// Outcome of fitting one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub target: Signal,
    pub model_id: String,
    pub training_samples: usize,
    pub validation_samples: usize,
    /// Held-out metrics, `None` when the validation split is empty.
    pub validation_metrics: Option<ValidationMetrics>,
}

/// Fit a forest for `target` and score it on the chronological tail.
pub fn train_model(
    table: &FeatureTable,
    inputs: &[String],
    target: Signal,
    config: &TrainingConfig,
) -> Result<(SmartcoreRandomForest, TrainingSummary)> {
    let dataset = TrainingDataset::from_table(table, inputs, target)?;
    let (train, validation) = dataset.split(config.train_ratio)?;
    if train.is_empty() {
        return Err(PipelineError::Model(format!(
            "no complete rows to train the {target} model on"
        )));
    }

    let mut model = SmartcoreRandomForest::train(
        &train.features,
        &train.targets,
        SmartcoreRandomForest::parameters(config),
        target,
        train.feature_names.clone(),
    )?;

    let validation_metrics = if validation.is_empty() {
        warn!(target = %target, "validation split is empty; keeping in-sample metrics");
        None
    } else {
        let matrix = super::FeatureMatrix::new(
            validation.feature_names.clone(),
            validation.features.clone(),
            validation.keys.clone(),
        )?;
        let predictions = model.predict(&matrix)?;
        let metrics = calculate_metrics(&predictions, &validation.targets)?;
        model.metadata.validation_metrics = metrics;
        if !metrics.meets_quality_threshold(MAX_MAPE, MIN_R2) {
            warn!(
                target = %target,
                mape = metrics.mape,
                r2 = metrics.r2,
                "validation metrics below quality threshold"
            );
        }
        Some(metrics)
    };

    info!(
        target = %target,
        train_rows = train.len(),
        validation_rows = validation.len(),
        mae = validation_metrics.map(|m| m.mae),
        mape = validation_metrics.map(|m| m.mape),
        "trained model"
    );

    let summary = TrainingSummary {
        target,
        model_id: model.metadata.model_id.clone(),
        training_samples: train.len(),
        validation_samples: validation.len(),
        validation_metrics,
    };
    Ok((model, summary))
}

/// Calculate validation metrics
pub fn calculate_metrics(predictions: &[f64], targets: &[f64]) -> Result<ValidationMetrics> {
    if predictions.len() != targets.len() {
        return Err(PipelineError::Model(
            "prediction and target count mismatch".into(),
        ));
    }

    if predictions.is_empty() {
        return Err(PipelineError::Model("no predictions to evaluate".into()));
    }

    let n = predictions.len() as f64;

    // Mean Absolute Error
    let mae: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).abs())
        .sum::<f64>()
        / n;

    // Root Mean Square Error
    let mse: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).powi(2))
        .sum::<f64>()
        / n;
    let rmse = mse.sqrt();

    // Mean Absolute Percentage Error over non-zero targets
    let (pct_sum, pct_count) = predictions
        .iter()
        .zip(targets.iter())
        .filter(|(_, t)| t.abs() > 1e-10)
        .fold((0.0, 0usize), |(sum, count), (p, t)| {
            (sum + ((p - t) / t).abs() * 100.0, count + 1)
        });
    let mape = if pct_count == 0 {
        0.0
    } else {
        pct_sum / pct_count as f64
    };

    // R-squared
    let mean_target: f64 = targets.iter().sum::<f64>() / n;
    let ss_tot: f64 = targets.iter().map(|t| (t - mean_target).powi(2)).sum();
    let ss_res: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (t - p).powi(2))
        .sum();

    let r2 = if ss_tot.abs() < 1e-10 {
        0.0
    } else {
        1.0 - (ss_res / ss_tot)
    };

    Ok(ValidationMetrics::new(mae, rmse, mape, r2))
}
