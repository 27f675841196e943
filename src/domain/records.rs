use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// One day of operations at one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalRecord {
    pub site_id: String,
    pub date: NaiveDate,
    pub units_produced: f64,
    pub power_kwh: f64,
    pub downtime_minutes: f64,
}

impl OperationalRecord {
    pub fn value(&self, signal: Signal) -> f64 {
        match signal {
            Signal::UnitsProduced => self.units_produced,
            Signal::PowerKwh => self.power_kwh,
            Signal::DowntimeMinutes => self.downtime_minutes,
        }
    }
}

/// Static per-site attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteMetadata {
    pub site_id: String,
    pub region: String,
    pub commissioned_year: i32,
    pub shift_hours_per_day: f64,
}

/// Numeric columns of an [`OperationalRecord`] that features and detectors
/// can be computed over.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Signal {
    UnitsProduced,
    PowerKwh,
    DowntimeMinutes,
}

impl Signal {
    pub fn lag_column(&self, lag: usize) -> String {
        format!("{}_lag{}", self.as_ref(), lag)
    }

    pub fn rolling_column(&self, window: usize) -> String {
        format!("{}_roll{}", self.as_ref(), window)
    }

    /// Column name used for this signal's z-score in alert output.
    pub fn zscore_column(&self) -> String {
        match self {
            Signal::DowntimeMinutes => "downtime_zscore".to_string(),
            other => format!("{}_zscore", other.as_ref()),
        }
    }
}
