//! Per-site production and power forecasting with downtime alerts.
//!
//! Data flows loader → [`domain::OrderedRecords`] → [`features::FeatureBuilder`]
//! → [`ml::Regressor`], with [`anomaly::AnomalyDetector`] scoring the raw
//! history on the side. [`forecast::ForecastPipeline`] ties the stages together.

pub mod anomaly;
pub mod config;
pub mod domain;
pub mod error;
pub mod features;
pub mod forecast;
pub mod loader;
pub mod ml;
pub mod telemetry;

pub use error::{PipelineError, Result};
