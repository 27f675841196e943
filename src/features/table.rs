use std::str::FromStr;

use tracing::debug;

use super::calendar::CalendarFeatures;
use super::encoding::is_region_column;
use crate::domain::{OperationalRecord, SiteQuery, Signal};
use crate::error::{PipelineError, Result};
use crate::ml::{FeatureMatrix, RowKey};

pub const CALENDAR_COLUMNS: [&str; 3] = ["day_of_week", "month", "week_of_year"];
pub const SITE_COLUMNS: [&str; 2] = ["commissioned_year", "shift_hours_per_day"];

/// An operational record with every derived feature attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub record: OperationalRecord,
    pub calendar: CalendarFeatures,
    /// `None` when the site has no metadata row.
    pub region: Option<String>,
    pub commissioned_year: Option<f64>,
    pub shift_hours_per_day: Option<f64>,
    /// Lag and rolling values, aligned with [`FeatureTable::derived_names`].
    pub derived: Vec<Option<f64>>,
    /// One-hot region indicators, aligned with [`FeatureTable::region_columns`].
    pub region_indicators: Vec<f64>,
}

/// Output of [`FeatureBuilder::build`](super::FeatureBuilder::build), ordered by (site, date).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    derived_names: Vec<String>,
    region_columns: Vec<String>,
    rows: Vec<FeatureRow>,
}

#[derive(Debug, Clone, Copy)]
enum ColumnRef {
    DayOfWeek,
    Month,
    WeekOfYear,
    CommissionedYear,
    ShiftHours,
    Signal(Signal),
    Derived(usize),
    Region(usize),
    AbsentRegion,
}

impl FeatureTable {
    pub(crate) fn new(
        derived_names: Vec<String>,
        region_columns: Vec<String>,
        rows: Vec<FeatureRow>,
    ) -> Self {
        Self {
            derived_names,
            region_columns,
            rows,
        }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn derived_names(&self) -> &[String] {
        &self.derived_names
    }

    pub fn region_columns(&self) -> &[String] {
        &self.region_columns
    }

    /// Every numeric column a model could be trained on.
    pub fn column_names(&self) -> Vec<String> {
        CALENDAR_COLUMNS
            .iter()
            .chain(SITE_COLUMNS.iter())
            .map(|s| s.to_string())
            .chain(self.derived_names.iter().cloned())
            .chain(self.region_columns.iter().cloned())
            .collect()
    }

    /// Value of `column` in row `row`. The outer `None` means the column is unknown.
    pub fn value(&self, row: usize, column: &str) -> Option<Option<f64>> {
        let column = self.resolve(column)?;
        self.rows.get(row).map(|r| Self::lookup(r, column))
    }

    /// Rows matching the query, as a new table with the same schema.
    pub fn select(&self, query: &SiteQuery) -> FeatureTable {
        let rows = self
            .rows
            .iter()
            .filter(|r| query.matches(&r.record.site_id, r.record.date))
            .cloned()
            .collect();
        Self::new(self.derived_names.clone(), self.region_columns.clone(), rows)
    }

    /// Project the named columns into a [`FeatureMatrix`]; nulls become NaN.
    ///
    /// Region indicators outside the vocabulary are zero columns. Any other
    /// unknown name is a [`PipelineError::Configuration`].
    pub fn to_matrix(&self, columns: &[String]) -> Result<FeatureMatrix> {
        let mut refs = Vec::with_capacity(columns.len());
        let mut unknown = Vec::new();
        for name in columns {
            match self.resolve(name) {
                Some(column) => refs.push(column),
                None if is_region_column(name) => {
                    debug!(column = %name, "region indicator outside vocabulary, filling zeros");
                    refs.push(ColumnRef::AbsentRegion);
                }
                None => unknown.push(name.as_str()),
            }
        }
        if !unknown.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "feature column(s) not produced by the feature builder: {} (available: {})",
                unknown.join(", "),
                self.column_names().join(", ")
            )));
        }

        let rows = self
            .rows
            .iter()
            .map(|row| {
                refs.iter()
                    .map(|&column| Self::lookup(row, column).unwrap_or(f64::NAN))
                    .collect()
            })
            .collect();
        let keys = self
            .rows
            .iter()
            .map(|row| RowKey {
                site_id: row.record.site_id.clone(),
                date: row.record.date,
            })
            .collect();
        Ok(FeatureMatrix::new(columns.to_vec(), rows, keys)?
            .with_known_regions(self.region_columns.clone()))
    }

    fn resolve(&self, name: &str) -> Option<ColumnRef> {
        let column = match name {
            "day_of_week" => ColumnRef::DayOfWeek,
            "month" => ColumnRef::Month,
            "week_of_year" => ColumnRef::WeekOfYear,
            "commissioned_year" => ColumnRef::CommissionedYear,
            "shift_hours_per_day" => ColumnRef::ShiftHours,
            other => {
                if let Some(idx) = self.derived_names.iter().position(|n| n == other) {
                    ColumnRef::Derived(idx)
                } else if let Some(idx) = self.region_columns.iter().position(|n| n == other) {
                    ColumnRef::Region(idx)
                } else {
                    ColumnRef::Signal(Signal::from_str(other).ok()?)
                }
            }
        };
        Some(column)
    }

    fn lookup(row: &FeatureRow, column: ColumnRef) -> Option<f64> {
        match column {
            ColumnRef::DayOfWeek => Some(row.calendar.day_of_week as f64),
            ColumnRef::Month => Some(row.calendar.month as f64),
            ColumnRef::WeekOfYear => Some(row.calendar.week_of_year as f64),
            ColumnRef::CommissionedYear => row.commissioned_year,
            ColumnRef::ShiftHours => row.shift_hours_per_day,
            ColumnRef::Signal(signal) => Some(row.record.value(signal)),
            ColumnRef::Derived(idx) => row.derived[idx],
            ColumnRef::Region(idx) => Some(row.region_indicators[idx]),
            ColumnRef::AbsentRegion => Some(0.0),
        }
    }
}
