//! Trailing-window statistics.
//!
//! A window always ends at the current row and only reaches backwards within
//! one site's date-sorted series. The two consumers use different start-up
//! policies: model-input rolling means are [`WindowPolicy::Strict`], the
//! anomaly detector is [`WindowPolicy::Partial`].

use serde::{Deserialize, Serialize};

use super::FeatureColumn;
use crate::domain::{OrderedRecords, Signal};

/// How a window behaves before `window` observations exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// No value until the window is full.
    Strict,
    /// Use the observations available so far, down to one.
    Partial,
}

/// Mean and sample standard deviation of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub mean: f64,
    /// `None` with fewer than two observations.
    pub std: Option<f64>,
}

impl WindowStats {
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.len() > 1).then(|| {
            let ss = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
            (ss / (n - 1.0)).sqrt()
        });
        Some(Self {
            count: values.len(),
            mean,
            std,
        })
    }
}

/// Stats of the window ending at each position of `values`.
pub fn trailing_window_stats(
    values: &[f64],
    window: usize,
    policy: WindowPolicy,
) -> Vec<Option<WindowStats>> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            if policy == WindowPolicy::Strict && slice.len() < window {
                None
            } else {
                WindowStats::of(slice)
            }
        })
        .collect()
}

/// Per-site trailing mean of `signal`, aligned with `ordered`.
pub fn rolling_mean_column(
    ordered: &OrderedRecords,
    signal: Signal,
    window: usize,
    policy: WindowPolicy,
) -> FeatureColumn {
    let mut values = vec![None; ordered.len()];
    for (_, offset, rows) in ordered.sites() {
        let series: Vec<f64> = rows.iter().map(|r| r.value(signal)).collect();
        for (i, stats) in trailing_window_stats(&series, window, policy)
            .into_iter()
            .enumerate()
        {
            values[offset + i] = stats.map(|s| s.mean);
        }
    }
    FeatureColumn::new(signal.rolling_column(window), values)
}

/// Strict trailing means (`<signal>_roll<window>`) for every signal.
pub fn add_rolling_features(
    ordered: &OrderedRecords,
    signals: &[Signal],
    window: usize,
) -> Vec<FeatureColumn> {
    signals
        .iter()
        .map(|&signal| rolling_mean_column(ordered, signal, window, WindowPolicy::Strict))
        .collect()
}
