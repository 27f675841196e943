//! Feature engineering for forecasting models
//!
//! Turns an [`OrderedRecords`] snapshot plus site metadata into a
//! [`FeatureTable`]. Each stage is a pure function returning its own columns,
//! so the per-site and no-lookahead guarantees can be checked stage by stage.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::config::FeatureConfig;
use crate::domain::{OrderedRecords, Signal, SiteMetadata};

pub mod calendar;
pub mod encoding;
pub mod lag;
pub mod rolling;
pub mod table;

pub use calendar::{add_calendar_features, CalendarFeatures};
pub use encoding::RegionVocabulary;
pub use lag::{add_lag_features, lag_column};
pub use rolling::{add_rolling_features, rolling_mean_column, WindowPolicy, WindowStats};
pub use table::{FeatureRow, FeatureTable};

/// A named derived column aligned with an [`OrderedRecords`] snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

impl FeatureColumn {
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Runs every feature stage with one fixed set of parameters.
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    lag_signals: Vec<Signal>,
    lags: Vec<usize>,
    rolling_signals: Vec<Signal>,
    rolling_window: usize,
    vocabulary: RegionVocabulary,
}

impl FeatureBuilder {
    pub fn new(
        lag_signals: Vec<Signal>,
        lags: Vec<usize>,
        rolling_signals: Vec<Signal>,
        rolling_window: usize,
        vocabulary: RegionVocabulary,
    ) -> Self {
        Self {
            lag_signals,
            lags,
            rolling_signals,
            rolling_window,
            vocabulary,
        }
    }

    pub fn from_config(config: &FeatureConfig) -> Self {
        Self::new(
            config.lag_signals.clone(),
            config.lags.clone(),
            config.rolling_signals.clone(),
            config.rolling_window,
            RegionVocabulary::new(config.regions.iter().cloned()),
        )
    }

    /// Build the feature table. Sites without metadata get null site
    /// attributes and all-zero region indicators.
    pub fn build(
        &self,
        ordered: &OrderedRecords,
        sites: &BTreeMap<String, SiteMetadata>,
    ) -> FeatureTable {
        let calendar = add_calendar_features(ordered.records());
        let mut derived = add_lag_features(ordered, &self.lag_signals, &self.lags);
        derived.extend(add_rolling_features(
            ordered,
            &self.rolling_signals,
            self.rolling_window,
        ));

        let mut missing_sites = BTreeSet::new();
        let mut unknown_regions = BTreeSet::new();
        let mut rows = Vec::with_capacity(ordered.len());

        for (idx, record) in ordered.records().iter().enumerate() {
            let site = sites.get(&record.site_id);
            match site {
                None => {
                    missing_sites.insert(record.site_id.as_str());
                }
                Some(meta) if !self.vocabulary.contains(&meta.region) => {
                    unknown_regions.insert(meta.region.as_str());
                }
                Some(_) => {}
            }
            let region = site.map(|s| s.region.as_str());

            rows.push(FeatureRow {
                record: record.clone(),
                calendar: calendar[idx],
                region: region.map(str::to_string),
                commissioned_year: site.map(|s| s.commissioned_year as f64),
                shift_hours_per_day: site.map(|s| s.shift_hours_per_day),
                derived: derived.iter().map(|c| c.values[idx]).collect(),
                region_indicators: self.vocabulary.encode(region),
            });
        }

        if !missing_sites.is_empty() {
            warn!(sites = ?missing_sites, "sites without metadata; site features left null");
        }
        if !unknown_regions.is_empty() {
            warn!(regions = ?unknown_regions, "regions outside the vocabulary encode as all zeros");
        }
        debug!(
            rows = rows.len(),
            derived_columns = derived.len(),
            "built feature table"
        );

        FeatureTable::new(
            derived.into_iter().map(|c| c.name).collect(),
            self.vocabulary.column_names(),
            rows,
        )
    }
}
