//! Machine Learning Module
//!
//! The forecast pipeline only sees models through [`Regressor`]: a fitted
//! model that knows the names of the features it was trained on and maps a
//! [`FeatureMatrix`] to one prediction per row.
//!
//! # Architecture
//! - [`FeatureMatrix`]: named numeric columns with a (site, date) key per row
//! - [`smartcore`]: random forest regressor, persisted with bincode
//! - [`training`]: dataset assembly, chronological split, validation metrics

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Signal;
use crate::error::{PipelineError, Result};
use crate::features::encoding::is_region_column;

pub mod smartcore;
pub mod training;

/// A fitted regression model.
pub trait Regressor {
    fn metadata(&self) -> &ModelMetadata;

    /// Names of the features, in the column order `predict` expects.
    fn feature_names(&self) -> &[String] {
        &self.metadata().feature_names
    }

    /// One prediction per row. `features` columns must already be in
    /// [`feature_names`](Self::feature_names) order.
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;
}

/// ML Model Metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub target: Signal,
    pub version: String,
    pub trained_at: chrono::DateTime<chrono::Utc>,
    pub training_samples: usize,
    pub validation_metrics: ValidationMetrics,
    pub feature_names: Vec<String>,
}

/// Validation Metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub mae: f64,  // Mean Absolute Error
    pub rmse: f64, // Root Mean Square Error
    pub mape: f64, // Mean Absolute Percentage Error (%)
    pub r2: f64,   // R-squared
}

impl ValidationMetrics {
    pub fn new(mae: f64, rmse: f64, mape: f64, r2: f64) -> Self {
        Self {
            mae,
            rmse,
            mape,
            r2,
        }
    }

    /// Check if metrics meet quality thresholds
    pub fn meets_quality_threshold(&self, max_mape: f64, min_r2: f64) -> bool {
        self.mape <= max_mape && self.r2 >= min_r2
    }
}

/// Identifies the observation a matrix row was built from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub site_id: String,
    pub date: NaiveDate,
}

/// Row-major numeric feature matrix with named columns. Missing values are NaN.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
    keys: Vec<RowKey>,
    /// Region indicators the source table could produce, whether or not
    /// they were projected into `columns`.
    known_regions: Vec<String>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>, keys: Vec<RowKey>) -> Result<Self> {
        if rows.len() != keys.len() {
            return Err(PipelineError::Configuration(format!(
                "feature matrix has {} rows but {} row keys",
                rows.len(),
                keys.len()
            )));
        }
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(PipelineError::Configuration(format!(
                "feature matrix row {bad} has {} values, expected {}",
                rows[bad].len(),
                columns.len()
            )));
        }
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(PipelineError::Configuration(format!(
                    "feature column '{name}' appears more than once"
                )));
            }
        }
        Ok(Self {
            columns,
            rows,
            keys,
            known_regions: Vec::new(),
        })
    }

    /// Record the region vocabulary of the table this matrix was projected from.
    pub fn with_known_regions(mut self, regions: Vec<String>) -> Self {
        self.known_regions = regions;
        self
    }

    pub fn known_regions(&self) -> &[String] {
        &self.known_regions
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }

    /// True if any cell is NaN or infinite.
    pub fn has_missing_values(&self) -> bool {
        self.rows.iter().flatten().any(|v| !v.is_finite())
    }

    /// Indices of rows whose every value is finite.
    pub fn complete_rows(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| row.iter().all(|v| v.is_finite()))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// A matrix holding only the rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            keys: indices.iter().map(|&i| self.keys[i].clone()).collect(),
            known_regions: self.known_regions.clone(),
        }
    }

    /// Reorder and subset columns to `expected`, matching by name.
    ///
    /// A missing `region_*` indicator outside [`known_regions`](Self::known_regions)
    /// is filled with zeros. Any other missing column, including a known region
    /// that was left out of the projection, is a [`PipelineError::Configuration`].
    pub fn align_to(&self, expected: &[String]) -> Result<FeatureMatrix> {
        let mut sources = Vec::with_capacity(expected.len());
        let mut missing = Vec::new();
        for name in expected {
            match self.columns.iter().position(|c| c == name) {
                Some(idx) => sources.push(Some(idx)),
                None if is_region_column(name) && !self.known_regions.contains(name) => {
                    debug!(column = %name, "zero-filling absent region indicator");
                    sources.push(None);
                }
                None => missing.push(name.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "model expects feature column(s) missing from the prepared data: {}",
                missing.join(", ")
            )));
        }

        let rows = self
            .rows
            .iter()
            .map(|row| {
                sources
                    .iter()
                    .map(|src| src.map_or(0.0, |idx| row[idx]))
                    .collect()
            })
            .collect();
        FeatureMatrix::new(expected.to_vec(), rows, self.keys.clone())
            .map(|m| m.with_known_regions(self.known_regions.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn key(day: u32) -> RowKey {
        RowKey {
            site_id: "S1".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
        }
    }

    fn matrix() -> FeatureMatrix {
        FeatureMatrix::new(
            names(&["month", "units_produced_lag1", "region_North"]),
            vec![vec![1.0, 100.0, 1.0], vec![1.0, 101.0, 1.0]],
            vec![key(1), key(2)],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_checks() {
        let err =
            FeatureMatrix::new(names(&["a", "b"]), vec![vec![1.0]], vec![key(1)]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        let err = FeatureMatrix::new(names(&["a"]), vec![vec![1.0]], vec![]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        let err = FeatureMatrix::new(names(&["a", "a"]), vec![], vec![]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_align_reorders_by_name() {
        let aligned = matrix()
            .align_to(&names(&["units_produced_lag1", "month"]))
            .unwrap();
        assert_eq!(aligned.columns(), &names(&["units_produced_lag1", "month"])[..]);
        assert_eq!(aligned.rows()[1], vec![101.0, 1.0]);
        assert_eq!(aligned.keys(), matrix().keys());
    }

    #[test]
    fn test_align_zero_fills_region_columns() {
        let aligned = matrix()
            .align_to(&names(&["region_North", "region_West", "month"]))
            .unwrap();
        assert_eq!(aligned.rows()[0], vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_align_missing_feature_is_configuration_error() {
        let err = matrix()
            .align_to(&names(&["month", "power_kwh_roll7"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("power_kwh_roll7"));
    }

    #[test]
    fn test_align_rejects_known_region_left_out_of_projection() {
        let projected = FeatureMatrix::new(names(&["month"]), vec![vec![1.0]], vec![key(1)])
            .unwrap()
            .with_known_regions(names(&["region_North", "region_South"]));

        let err = projected
            .align_to(&names(&["month", "region_North"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains("region_North"));

        let aligned = projected
            .align_to(&names(&["month", "region_Central"]))
            .unwrap();
        assert_eq!(aligned.rows()[0], vec![1.0, 0.0]);
    }

    #[test]
    fn test_select_complete_rows() {
        let m = FeatureMatrix::new(
            names(&["a", "b"]),
            vec![vec![f64::NAN, 1.0], vec![2.0, 3.0], vec![4.0, f64::INFINITY]],
            vec![key(1), key(2), key(3)],
        )
        .unwrap();
        let complete = m.complete_rows();
        assert_eq!(complete, vec![1]);

        let subset = m.select_rows(&complete);
        assert_eq!(subset.rows(), &[vec![2.0, 3.0]]);
        assert_eq!(subset.keys(), &[key(2)]);
    }

    #[test]
    fn test_missing_values_detected() {
        let m = FeatureMatrix::new(names(&["a"]), vec![vec![f64::NAN]], vec![key(1)]).unwrap();
        assert!(m.has_missing_values());
        assert!(!matrix().has_missing_values());
    }

    #[test]
    fn test_validation_metrics() {
        let metrics = ValidationMetrics::new(0.5, 0.7, 5.0, 0.95);

        assert!(metrics.meets_quality_threshold(10.0, 0.9));
        assert!(!metrics.meets_quality_threshold(3.0, 0.9));
        assert!(!metrics.meets_quality_threshold(10.0, 0.97));
    }
}
