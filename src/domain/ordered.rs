use std::ops::Range;

use itertools::Itertools;

use super::OperationalRecord;
use crate::error::{PipelineError, Result};

/// Records sorted by `(site_id, date)` with the index span of every site.
///
/// Every per-site stage reads from this snapshot, so sorting and the
/// one-row-per-(site, date) check happen exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedRecords {
    records: Vec<OperationalRecord>,
    spans: Vec<(String, Range<usize>)>,
}

impl OrderedRecords {
    pub fn new(mut records: Vec<OperationalRecord>) -> Result<Self> {
        records.sort_by(|a, b| a.site_id.cmp(&b.site_id).then(a.date.cmp(&b.date)));

        let duplicates: Vec<String> = records
            .iter()
            .tuple_windows()
            .filter(|(a, b)| a.site_id == b.site_id && a.date == b.date)
            .map(|(a, _)| format!("({}, {})", a.site_id, a.date))
            .dedup()
            .collect();
        if !duplicates.is_empty() {
            return Err(PipelineError::DataFormat(format!(
                "duplicate (site_id, date) rows: {}",
                duplicates.iter().join(", ")
            )));
        }

        let mut spans: Vec<(String, Range<usize>)> = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            match spans.last_mut() {
                Some((site, range)) if *site == record.site_id => range.end = idx + 1,
                _ => spans.push((record.site_id.clone(), idx..idx + 1)),
            }
        }

        Ok(Self { records, spans })
    }

    pub fn records(&self) -> &[OperationalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Each site's date-sorted series together with its offset into [`records`](Self::records).
    pub fn sites(&self) -> impl Iterator<Item = (&str, usize, &[OperationalRecord])> {
        self.spans
            .iter()
            .map(|(site, range)| (site.as_str(), range.start, &self.records[range.clone()]))
    }

    pub fn site_count(&self) -> usize {
        self.spans.len()
    }
}
