//! Rolling z-score anomaly detection.
//!
//! Statistics use a trailing window that includes the current row and starts
//! producing values from the first observation of each site. A row is flagged
//! when `|z| > threshold`; an undefined z-score (fewer than two observations,
//! or zero spread) never flags.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnomalyConfig;
use crate::domain::{OperationalRecord, OrderedRecords, Signal};
use crate::features::rolling::{trailing_window_stats, WindowPolicy};

/// A record with the rolling statistics of one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingStatsRow {
    pub record: OperationalRecord,
    pub signal: Signal,
    pub rolling_mean: f64,
    pub rolling_std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRow {
    pub record: OperationalRecord,
    pub signal: Signal,
    pub value: f64,
    pub rolling_mean: f64,
    pub rolling_std: Option<f64>,
    pub zscore: Option<f64>,
    pub is_anomaly: bool,
}

/// Per-site trailing mean and sample standard deviation of `signal`
/// (minimum one observation), in `ordered` order.
pub fn rolling_stats(
    ordered: &OrderedRecords,
    signal: Signal,
    window: usize,
) -> Vec<RollingStatsRow> {
    let mut out = Vec::with_capacity(ordered.len());
    for (_, _, rows) in ordered.sites() {
        let series: Vec<f64> = rows.iter().map(|r| r.value(signal)).collect();
        let stats = trailing_window_stats(&series, window, WindowPolicy::Partial);
        for (record, stats) in rows.iter().zip(stats) {
            // Partial windows always hold at least the current row.
            let (rolling_mean, rolling_std) = match stats {
                Some(s) => (s.mean, s.std),
                None => (f64::NAN, None),
            };
            out.push(RollingStatsRow {
                record: record.clone(),
                signal,
                rolling_mean,
                rolling_std,
            });
        }
    }
    out
}

/// z-score of `value` against a window, `None` when it is not a finite number.
pub fn zscore(value: f64, mean: f64, std: Option<f64>) -> Option<f64> {
    let std = std.filter(|s| s.is_finite() && *s > 0.0)?;
    let z = (value - mean) / std;
    z.is_finite().then_some(z)
}

pub fn detect_anomalies(stats: &[RollingStatsRow], threshold: f64) -> Vec<AnomalyRow> {
    stats
        .iter()
        .map(|row| {
            let value = row.record.value(row.signal);
            let zscore = zscore(value, row.rolling_mean, row.rolling_std);
            AnomalyRow {
                record: row.record.clone(),
                signal: row.signal,
                value,
                rolling_mean: row.rolling_mean,
                rolling_std: row.rolling_std,
                zscore,
                is_anomaly: zscore.is_some_and(|z| z.abs() > threshold),
            }
        })
        .collect()
}

/// [`rolling_stats`] followed by [`detect_anomalies`] with fixed parameters.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    signal: Signal,
    window: usize,
    threshold: f64,
}

impl AnomalyDetector {
    pub fn new(signal: Signal, window: usize, threshold: f64) -> Self {
        Self {
            signal,
            window,
            threshold,
        }
    }

    pub fn from_config(config: &AnomalyConfig) -> Self {
        Self::new(config.signal, config.window, config.threshold)
    }

    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Every row, flagged or not.
    pub fn score(&self, ordered: &OrderedRecords) -> Vec<AnomalyRow> {
        let stats = rolling_stats(ordered, self.signal, self.window);
        let rows = detect_anomalies(&stats, self.threshold);
        debug!(
            signal = %self.signal,
            rows = rows.len(),
            flagged = rows.iter().filter(|r| r.is_anomaly).count(),
            "scored anomalies"
        );
        rows
    }
}
