use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::anomaly::AnomalyRow;
use crate::domain::Signal;
use crate::error::{PipelineError, Result};

pub const UNITS_FILE: &str = "forecast_units.csv";
pub const POWER_FILE: &str = "forecast_power.csv";
pub const ALERTS_FILE: &str = "alerts.csv";

/// `forecast_units` is `None` (an empty CSV cell) when the row lacks a lag or
/// a full rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitsForecast {
    pub site_id: String,
    pub date: NaiveDate,
    pub forecast_units: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerForecast {
    pub site_id: String,
    pub date: NaiveDate,
    pub forecast_power: Option<f64>,
}

/// Units and power forecasts. Both tables have the same rows in the same
/// (site, date) order, including rows left without a forecast.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForecastOutput {
    pub units: Vec<UnitsForecast>,
    pub power: Vec<PowerForecast>,
}

impl ForecastOutput {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Rows with both forecasts present.
    pub fn forecast_count(&self) -> usize {
        self.units
            .iter()
            .zip(&self.power)
            .filter(|(u, p)| u.forecast_units.is_some() && p.forecast_power.is_some())
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastFiles {
    pub units_path: PathBuf,
    pub power_path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertFiles {
    pub path: PathBuf,
    pub alerts: usize,
}

pub fn write_forecasts(dir: &Path, output: &ForecastOutput) -> Result<ForecastFiles> {
    ensure_dir(dir)?;
    let units_path = dir.join(UNITS_FILE);
    let power_path = dir.join(POWER_FILE);

    write_table(
        &units_path,
        &["site_id", "date", "forecast_units"],
        &output.units,
    )?;
    write_table(
        &power_path,
        &["site_id", "date", "forecast_power"],
        &output.power,
    )?;

    info!(
        units = %units_path.display(),
        power = %power_path.display(),
        rows = output.len(),
        "wrote forecasts"
    );
    Ok(ForecastFiles {
        units_path,
        power_path,
        rows: output.len(),
    })
}

/// Write flagged rows as `site_id, date, <signal>, <zscore column>`.
/// Unflagged rows are skipped; an empty file still gets its header.
pub fn write_alerts(dir: &Path, signal: Signal, rows: &[AnomalyRow]) -> Result<AlertFiles> {
    ensure_dir(dir)?;
    let path = dir.join(ALERTS_FILE);
    let zscore_column = signal.zscore_column();

    let alerts: Vec<(&str, NaiveDate, f64, Option<f64>)> = rows
        .iter()
        .filter(|r| r.is_anomaly)
        .map(|r| (r.record.site_id.as_str(), r.record.date, r.value, r.zscore))
        .collect();
    write_table(
        &path,
        &["site_id", "date", signal.as_ref(), zscore_column.as_str()],
        &alerts,
    )?;

    info!(path = %path.display(), alerts = alerts.len(), "wrote alerts");
    Ok(AlertFiles {
        path,
        alerts: alerts.len(),
    })
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
}

fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))
}
