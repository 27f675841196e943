//! Reading operations and site metadata tables.
//!
//! Both tables are delimited text with a header row. Column order is free and
//! extra columns are ignored; a missing required column fails the whole load.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{OperationalRecord, SiteMetadata};
use crate::error::{PipelineError, Result};

pub const OPERATION_COLUMNS: [&str; 5] = [
    "site_id",
    "date",
    "units_produced",
    "power_kwh",
    "downtime_minutes",
];

pub const SITE_METADATA_COLUMNS: [&str; 4] = [
    "site_id",
    "region",
    "commissioned_year",
    "shift_hours_per_day",
];

/// Counts from [`filter_valid_with_report`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterReport {
    pub kept: usize,
    pub dropped: usize,
}

pub fn load_operations<R: Read>(source: R) -> Result<Vec<OperationalRecord>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(source);
    let columns = ColumnIndex::resolve(reader.headers()?, &OPERATION_COLUMNS, "operations")?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let line = line_of(&row);
        records.push(OperationalRecord {
            site_id: columns.text(&row, 0, line)?.to_string(),
            date: columns.date(&row, 1, line)?,
            units_produced: columns.number(&row, 2, line)?,
            power_kwh: columns.number(&row, 3, line)?,
            downtime_minutes: columns.number(&row, 4, line)?,
        });
    }

    debug!(rows = records.len(), "loaded operations table");
    Ok(records)
}

pub fn load_site_metadata<R: Read>(source: R) -> Result<BTreeMap<String, SiteMetadata>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(source);
    let columns =
        ColumnIndex::resolve(reader.headers()?, &SITE_METADATA_COLUMNS, "site metadata")?;

    let mut sites = BTreeMap::new();
    for row in reader.records() {
        let row = row?;
        let line = line_of(&row);
        let site = SiteMetadata {
            site_id: columns.text(&row, 0, line)?.to_string(),
            region: columns.text(&row, 1, line)?.to_string(),
            commissioned_year: columns.year(&row, 2, line)?,
            shift_hours_per_day: columns.number(&row, 3, line)?,
        };
        if sites.contains_key(&site.site_id) {
            return Err(PipelineError::DataFormat(format!(
                "site metadata line {line}: duplicate site_id '{}'",
                site.site_id
            )));
        }
        sites.insert(site.site_id.clone(), site);
    }

    debug!(sites = sites.len(), "loaded site metadata table");
    Ok(sites)
}

pub fn load_operations_file(path: impl AsRef<Path>) -> Result<Vec<OperationalRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    load_operations(file)
}

pub fn load_site_metadata_file(path: impl AsRef<Path>) -> Result<BTreeMap<String, SiteMetadata>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    load_site_metadata(file)
}

/// Keep rows with positive production and power. Dropped rows are not reported.
pub fn filter_valid(records: Vec<OperationalRecord>) -> Vec<OperationalRecord> {
    records.into_iter().filter(is_valid).collect()
}

/// [`filter_valid`] plus kept/dropped counts.
pub fn filter_valid_with_report(
    records: Vec<OperationalRecord>,
) -> (Vec<OperationalRecord>, FilterReport) {
    let total = records.len();
    let kept = filter_valid(records);
    let report = FilterReport {
        kept: kept.len(),
        dropped: total - kept.len(),
    };
    (kept, report)
}

fn is_valid(record: &OperationalRecord) -> bool {
    record.units_produced > 0.0 && record.power_kwh > 0.0
}

/// Parse a calendar date. Timestamps are truncated to their date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn line_of(row: &StringRecord) -> u64 {
    row.position().map(|p| p.line()).unwrap_or_default()
}

/// Positions of the required columns in a header, in the order they were requested.
struct ColumnIndex {
    names: &'static [&'static str],
    positions: Vec<usize>,
    table: &'static str,
}

impl ColumnIndex {
    fn resolve(
        headers: &StringRecord,
        required: &'static [&'static str],
        table: &'static str,
    ) -> Result<Self> {
        let found: Vec<Option<usize>> = required
            .iter()
            .map(|name| headers.iter().position(|h| h == *name))
            .collect();

        let missing = required
            .iter()
            .zip(&found)
            .filter(|(_, pos)| pos.is_none())
            .map(|(name, _)| *name)
            .join(", ");
        if !missing.is_empty() {
            return Err(PipelineError::DataFormat(format!(
                "{table} table is missing required column(s): {missing}"
            )));
        }

        Ok(Self {
            names: required,
            positions: found.into_iter().flatten().collect(),
            table,
        })
    }

    fn text<'r>(&self, row: &'r StringRecord, column: usize, line: u64) -> Result<&'r str> {
        match row.get(self.positions[column]) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(self.bad_cell(column, line, "empty value")),
        }
    }

    fn number(&self, row: &StringRecord, column: usize, line: u64) -> Result<f64> {
        let raw = self.text(row, column, line)?;
        raw.parse::<f64>()
            .map_err(|_| self.bad_cell(column, line, &format!("'{raw}' is not a number")))
    }

    fn year(&self, row: &StringRecord, column: usize, line: u64) -> Result<i32> {
        let raw = self.text(row, column, line)?;
        if let Ok(year) = raw.parse::<i32>() {
            return Ok(year);
        }
        // Spreadsheet exports often write integer columns as "2015.0".
        match raw.parse::<f64>() {
            Ok(value) if value.fract() == 0.0 && value.abs() < i32::MAX as f64 => Ok(value as i32),
            _ => Err(self.bad_cell(column, line, &format!("'{raw}' is not a year"))),
        }
    }

    fn date(&self, row: &StringRecord, column: usize, line: u64) -> Result<NaiveDate> {
        let raw = self.text(row, column, line)?;
        parse_date(raw)
            .ok_or_else(|| self.bad_cell(column, line, &format!("'{raw}' is not a date")))
    }

    fn bad_cell(&self, column: usize, line: u64, reason: &str) -> PipelineError {
        PipelineError::DataFormat(format!(
            "{} table line {line}, column '{}': {reason}",
            self.table, self.names[column]
        ))
    }
}
