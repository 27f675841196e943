use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A site and an inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteQuery {
    pub site_id: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SiteQuery {
    pub fn new(site_id: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            site_id: site_id.into(),
            start,
            end,
        }
    }

    pub fn matches(&self, site_id: &str, date: NaiveDate) -> bool {
        site_id == self.site_id && date >= self.start && date <= self.end
    }
}

impl fmt::Display for SiteQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "site {} between {} and {}",
            self.site_id, self.start, self.end
        )
    }
}

/// Result of a site/date selection.
///
/// `NoData` means nothing matched the query. It is an ordinary outcome, kept
/// apart from `Rows` holding an empty answer (e.g. a range with data but no
/// anomalies).
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T> {
    Rows(T),
    NoData(SiteQuery),
}

impl<T> QueryOutcome<T> {
    pub fn is_no_data(&self) -> bool {
        matches!(self, QueryOutcome::NoData(_))
    }

    pub fn rows(self) -> Option<T> {
        match self {
            QueryOutcome::Rows(rows) => Some(rows),
            QueryOutcome::NoData(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryOutcome<U> {
        match self {
            QueryOutcome::Rows(rows) => QueryOutcome::Rows(f(rows)),
            QueryOutcome::NoData(query) => QueryOutcome::NoData(query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_query_range_is_inclusive() {
        let query = SiteQuery::new("S1", date(2024, 1, 1), date(2024, 1, 3));
        assert!(query.matches("S1", date(2024, 1, 1)));
        assert!(query.matches("S1", date(2024, 1, 3)));
        assert!(!query.matches("S1", date(2024, 1, 4)));
        assert!(!query.matches("S2", date(2024, 1, 2)));
    }

    #[test]
    fn test_query_display() {
        let query = SiteQuery::new("S1", date(2099, 1, 1), date(2099, 1, 2));
        assert_eq!(
            query.to_string(),
            "site S1 between 2099-01-01 and 2099-01-02"
        );
    }

    #[test]
    fn test_outcome_map_keeps_no_data() {
        let query = SiteQuery::new("S1", date(2099, 1, 1), date(2099, 1, 2));
        let outcome: QueryOutcome<Vec<u8>> = QueryOutcome::NoData(query.clone());
        let mapped = outcome.map(|rows| rows.len());
        assert_eq!(mapped, QueryOutcome::NoData(query));

        let rows = QueryOutcome::Rows(vec![1, 2]).map(|rows| rows.len());
        assert_eq!(rows.rows(), Some(2));
    }
}
