use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::domain::OperationalRecord;

/// Calendar features of a single date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFeatures {
    /// Day of week (0=Monday, 6=Sunday)
    pub day_of_week: u32,
    /// Month (1-12)
    pub month: u32,
    /// ISO 8601 week number (1-53)
    pub week_of_year: u32,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            day_of_week: date.weekday().num_days_from_monday(),
            month: date.month(),
            week_of_year: date.iso_week().week(),
        }
    }
}

/// Calendar features for every record, in input order.
pub fn add_calendar_features(records: &[OperationalRecord]) -> Vec<CalendarFeatures> {
    records
        .iter()
        .map(|r| CalendarFeatures::from_date(r.date))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    // Monday
    #[case((2024, 1, 1), 0, 1, 1)]
    // Sunday
    #[case((2024, 1, 7), 6, 1, 1)]
    // ISO week 53 of 2020 runs into January 2021
    #[case((2021, 1, 3), 6, 1, 53)]
    // Dec 30 2024 belongs to ISO week 1 of 2025
    #[case((2024, 12, 30), 0, 12, 1)]
    #[case((2024, 2, 29), 3, 2, 9)]
    fn test_calendar_features(
        #[case] ymd: (i32, u32, u32),
        #[case] day_of_week: u32,
        #[case] month: u32,
        #[case] week_of_year: u32,
    ) {
        let date = NaiveDate::from_ymd_opt(ymd.0, ymd.1, ymd.2).unwrap();
        assert_eq!(
            CalendarFeatures::from_date(date),
            CalendarFeatures {
                day_of_week,
                month,
                week_of_year
            }
        );
    }

    #[test]
    fn test_add_calendar_features_keeps_input_order() {
        let records: Vec<OperationalRecord> = [(2024, 3, 5), (2024, 1, 1)]
            .iter()
            .map(|&(y, m, d)| OperationalRecord {
                site_id: "S1".to_string(),
                date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
                units_produced: 1.0,
                power_kwh: 1.0,
                downtime_minutes: 0.0,
            })
            .collect();

        let features = add_calendar_features(&records);
        assert_eq!(features[0].month, 3);
        assert_eq!(features[1].month, 1);
    }
}
