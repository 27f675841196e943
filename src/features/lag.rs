use super::FeatureColumn;
use crate::domain::{OrderedRecords, Signal};

/// `<signal>_lag<lag>`: the value `lag` observations earlier in the same
/// site's series, `None` for the first `lag` rows of every site.
///
/// Lags are positional. If a day is missing from a site's series the lag
/// refers to the previous observation that exists.
pub fn lag_column(ordered: &OrderedRecords, signal: Signal, lag: usize) -> FeatureColumn {
    let mut values = vec![None; ordered.len()];
    for (_, offset, rows) in ordered.sites() {
        for i in lag..rows.len() {
            values[offset + i] = Some(rows[i - lag].value(signal));
        }
    }
    FeatureColumn::new(signal.lag_column(lag), values)
}

/// One lag column per (signal, lag), signal-major.
pub fn add_lag_features(
    ordered: &OrderedRecords,
    signals: &[Signal],
    lags: &[usize],
) -> Vec<FeatureColumn> {
    signals
        .iter()
        .flat_map(|&signal| lags.iter().map(move |&lag| lag_column(ordered, signal, lag)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OperationalRecord;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;

    fn record(site: &str, day: i64, units: f64) -> OperationalRecord {
        OperationalRecord {
            site_id: site.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(day),
            units_produced: units,
            power_kwh: units + 0.5,
            downtime_minutes: 0.0,
        }
    }

    #[test]
    fn test_lag_one_and_two() {
        let records = (0..4).map(|d| record("S1", d, d as f64 + 1.0)).collect();
        let ordered = OrderedRecords::new(records).unwrap();

        let columns = add_lag_features(
            &ordered,
            &[Signal::UnitsProduced, Signal::PowerKwh],
            &[1, 2],
        );
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "units_produced_lag1",
                "units_produced_lag2",
                "power_kwh_lag1",
                "power_kwh_lag2"
            ]
        );
        assert_eq!(columns[0].values, vec![None, Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(columns[1].values, vec![None, None, Some(1.0), Some(2.0)]);
        assert_eq!(columns[2].values, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn test_lag_never_crosses_sites_with_interleaved_input() {
        // Global order alternates between sites.
        let records = vec![
            record("S1", 0, 100.0),
            record("S2", 0, 5.0),
            record("S1", 1, 101.0),
            record("S2", 1, 6.0),
            record("S1", 2, 102.0),
        ];
        let ordered = OrderedRecords::new(records).unwrap();
        let lag1 = lag_column(&ordered, Signal::UnitsProduced, 1);

        assert_eq!(
            lag1.values,
            vec![None, Some(100.0), Some(101.0), None, Some(5.0)]
        );
    }

    #[test]
    fn test_scenario_lag_before_spike() {
        let units = [100.0, 102.0, 98.0, 101.0, 99.0, 100.0, 103.0, 97.0, 250.0, 101.0];
        let records = units
            .iter()
            .enumerate()
            .map(|(d, &u)| record("S1", d as i64, u))
            .collect();
        let ordered = OrderedRecords::new(records).unwrap();
        let lag1 = lag_column(&ordered, Signal::UnitsProduced, 1);
        assert_eq!(lag1.values[8], Some(97.0));
        assert_eq!(lag1.values[9], Some(250.0));
    }

    proptest! {
        #[test]
        fn prop_lag_matches_previous_date_of_same_site(
            rows in prop::collection::vec((0usize..3, 0i64..30, 1.0f64..500.0), 1..60),
        ) {
            let sites = ["A", "B", "C"];
            let mut seen = std::collections::BTreeSet::new();
            let records: Vec<OperationalRecord> = rows
                .into_iter()
                .filter(|(s, d, _)| seen.insert((*s, *d)))
                .map(|(s, d, u)| record(sites[s], d, u))
                .collect();
            let ordered = OrderedRecords::new(records.clone()).unwrap();
            let lag1 = lag_column(&ordered, Signal::UnitsProduced, 1);

            for (record, lag) in ordered.records().iter().zip(&lag1.values) {
                let previous = records
                    .iter()
                    .filter(|r| r.site_id == record.site_id && r.date < record.date)
                    .max_by_key(|r| r.date)
                    .map(|r| r.units_produced);
                prop_assert_eq!(*lag, previous);
            }
        }
    }
}
