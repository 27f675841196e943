use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use validator::Validate;

use crate::domain::Signal;
use crate::features::encoding::region_column;

pub const ENV_PREFIX: &str = "SITE_FORECAST__";

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    pub data: DataConfig,
    pub output: OutputConfig,
    pub models: ModelsConfig,
    #[validate(nested)]
    pub features: FeatureConfig,
    #[validate(nested)]
    pub anomaly: AnomalyConfig,
    #[validate(nested)]
    pub training: TrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub operations_path: PathBuf,
    pub site_meta_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            operations_path: PathBuf::from("data/operations_daily_365d.csv"),
            site_meta_path: PathBuf::from("data/site_meta.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub units_path: PathBuf,
    pub power_path: PathBuf,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            units_path: PathBuf::from("models/rf_units_model.bin"),
            power_path: PathBuf::from("models/rf_power_model.bin"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FeatureConfig {
    pub lag_signals: Vec<Signal>,
    #[validate(length(min = 1))]
    pub lags: Vec<usize>,
    pub rolling_signals: Vec<Signal>,
    #[validate(range(min = 1))]
    pub rolling_window: usize,
    /// Closed region vocabulary for one-hot encoding.
    #[validate(length(min = 1))]
    pub regions: Vec<String>,
    /// Columns handed to the regressors, by name.
    #[validate(length(min = 1))]
    pub model_inputs: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        let regions: Vec<String> = ["East", "North", "South", "West"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut model_inputs: Vec<String> = [
            "units_produced_lag1",
            "power_kwh_lag1",
            "units_produced_roll7",
            "power_kwh_roll7",
            "day_of_week",
            "month",
            "week_of_year",
            "commissioned_year",
            "shift_hours_per_day",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        model_inputs.extend(regions.iter().map(|r| region_column(r)));

        Self {
            lag_signals: vec![Signal::UnitsProduced, Signal::PowerKwh],
            lags: vec![1],
            rolling_signals: vec![Signal::UnitsProduced, Signal::PowerKwh],
            rolling_window: 7,
            regions,
            model_inputs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnomalyConfig {
    pub signal: Signal,
    #[validate(range(min = 1))]
    pub window: usize,
    #[validate(range(min = 0.0))]
    pub threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            signal: Signal::DowntimeMinutes,
            window: 14,
            threshold: 3.0,
        }
    }
}

impl AnomalyConfig {
    /// Largest |z| an inclusive window of `window` observations can produce:
    /// (n - 1) / sqrt(n).
    pub fn max_reachable_zscore(&self) -> f64 {
        let n = self.window as f64;
        (n - 1.0) / n.sqrt()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrainingConfig {
    #[validate(range(min = 1))]
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
    /// Fraction of the chronologically ordered rows used for fitting.
    #[validate(range(min = 0.05, max = 0.95))]
    pub train_ratio: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: Some(10),
            min_samples_split: 5,
            min_samples_leaf: 2,
            train_ratio: 0.8,
            seed: 42,
        }
    }
}

impl Config {
    /// Defaults, then `path` (if it exists), then `SITE_FORECAST__SECTION__KEY`
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Config = figment.extract()?;
        config.check()?;
        Ok(config)
    }

    /// Field validation plus the cross-field rules derive can't express.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        if self.features.lags.contains(&0) {
            anyhow::bail!("features.lags must be positive; a lag of 0 is the current value");
        }

        if self.anomaly.max_reachable_zscore() <= self.anomaly.threshold {
            warn!(
                window = self.anomaly.window,
                threshold = self.anomaly.threshold,
                max_zscore = self.anomaly.max_reachable_zscore(),
                "anomaly window too short for the threshold; no row can be flagged"
            );
        }
        Ok(())
    }
}
