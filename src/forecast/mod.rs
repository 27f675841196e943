//! Forecast orchestration.
//!
//! [`ForecastPipeline`] wires loader output through the feature builder into
//! the two regressors, and runs the anomaly detector for alerts. Every call
//! works on the [`Dataset`] snapshot it is given; the only state kept between
//! calls is the lazily loaded models.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::unsync::OnceCell;
use tracing::{debug, info};

use crate::anomaly::{AnomalyDetector, AnomalyRow};
use crate::config::{Config, DataConfig};
use crate::domain::{
    OperationalRecord, OrderedRecords, QueryOutcome, Signal, SiteMetadata, SiteQuery,
};
use crate::error::{PipelineError, Result};
use crate::features::{FeatureBuilder, FeatureTable};
use crate::loader;
use crate::ml::smartcore::SmartcoreRandomForest;
use crate::ml::training::{train_model, TrainingSummary};
use crate::ml::{FeatureMatrix, Regressor};

pub mod output;

pub use output::{
    write_alerts, write_forecasts, AlertFiles, ForecastFiles, ForecastOutput, PowerForecast,
    UnitsForecast,
};

/// Raw inputs of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub operations: Vec<OperationalRecord>,
    pub sites: BTreeMap<String, SiteMetadata>,
}

impl Dataset {
    pub fn new(operations: Vec<OperationalRecord>, sites: BTreeMap<String, SiteMetadata>) -> Self {
        Self { operations, sites }
    }

    pub fn load(config: &DataConfig) -> Result<Self> {
        let operations = loader::load_operations_file(&config.operations_path)?;
        let sites = loader::load_site_metadata_file(&config.site_meta_path)?;
        info!(
            operations = operations.len(),
            sites = sites.len(),
            "loaded dataset"
        );
        Ok(Self::new(operations, sites))
    }
}

/// Run `model` on `matrix`, matching columns to the model's features by name.
pub fn predict(matrix: &FeatureMatrix, model: &dyn Regressor) -> Result<Vec<f64>> {
    let aligned = matrix.align_to(model.feature_names())?;
    let predictions = model.predict(&aligned)?;
    if predictions.len() != matrix.len() {
        return Err(PipelineError::Model(format!(
            "model {} returned {} predictions for {} rows",
            model.metadata().model_id,
            predictions.len(),
            matrix.len()
        )));
    }
    Ok(predictions)
}

/// [`predict`] over the rows whose inputs are all present.
///
/// Models are fitted on complete rows only, so a row missing a lag or a full
/// rolling window gets `None` instead of a prediction.
pub fn predict_complete(matrix: &FeatureMatrix, model: &dyn Regressor) -> Result<Vec<Option<f64>>> {
    if !matrix.has_missing_values() {
        return Ok(predict(matrix, model)?.into_iter().map(Some).collect());
    }

    let complete = matrix.complete_rows();
    debug!(
        model_id = %model.metadata().model_id,
        skipped = matrix.len() - complete.len(),
        "rows with incomplete inputs left without a forecast"
    );
    let mut out = vec![None; matrix.len()];
    if complete.is_empty() {
        return Ok(out);
    }
    let predictions = predict(&matrix.select_rows(&complete), model)?;
    for (idx, value) in complete.into_iter().zip(predictions) {
        out[idx] = Some(value);
    }
    Ok(out)
}

pub struct ForecastPipeline {
    config: Config,
    builder: FeatureBuilder,
    detector: AnomalyDetector,
    units_model: OnceCell<Box<dyn Regressor>>,
    power_model: OnceCell<Box<dyn Regressor>>,
}

impl ForecastPipeline {
    pub fn new(config: Config) -> Self {
        Self {
            builder: FeatureBuilder::from_config(&config.features),
            detector: AnomalyDetector::from_config(&config.anomaly),
            config,
            units_model: OnceCell::new(),
            power_model: OnceCell::new(),
        }
    }

    /// Use already-fitted models instead of loading them from the configured paths.
    pub fn with_models(mut self, units: Box<dyn Regressor>, power: Box<dyn Regressor>) -> Self {
        self.units_model = OnceCell::with_value(units);
        self.power_model = OnceCell::with_value(power);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Valid rows of every site, joined with metadata and featurised over the
    /// full history.
    pub fn feature_table(&self, dataset: &Dataset) -> Result<FeatureTable> {
        let (valid, report) = loader::filter_valid_with_report(dataset.operations.clone());
        if report.dropped > 0 {
            info!(
                dropped = report.dropped,
                kept = report.kept,
                "dropped rows with non-positive units or power"
            );
        }
        let ordered = OrderedRecords::new(valid)?;
        debug!(rows = ordered.len(), sites = ordered.site_count(), "ordered operations");
        Ok(self.builder.build(&ordered, &dataset.sites))
    }

    /// Feature rows of one site and date range, featurised over the full history.
    pub fn select_features(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<FeatureTable>> {
        let selected = self.feature_table(dataset)?.select(query);
        if selected.is_empty() {
            debug!(%query, "no feature rows for query");
            return Ok(QueryOutcome::NoData(query.clone()));
        }
        Ok(QueryOutcome::Rows(selected))
    }

    /// Feature matrix of the configured model inputs for one site and date range.
    pub fn prepare_features(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<FeatureMatrix>> {
        match self.select_features(dataset, query)? {
            QueryOutcome::Rows(selected) => selected
                .to_matrix(&self.config.features.model_inputs)
                .map(QueryOutcome::Rows),
            QueryOutcome::NoData(query) => Ok(QueryOutcome::NoData(query)),
        }
    }

    /// Units and power forecasts for the query range.
    ///
    /// Each model gets the selected rows projected onto its own feature list.
    /// Rows without complete inputs are kept with an empty forecast.
    pub fn forecast(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<ForecastOutput>> {
        let selected = match self.select_features(dataset, query)? {
            QueryOutcome::Rows(selected) => selected,
            QueryOutcome::NoData(query) => return Ok(QueryOutcome::NoData(query)),
        };

        let units_model = self.units_model()?;
        let units_inputs = selected.to_matrix(units_model.feature_names())?;
        let units = predict_complete(&units_inputs, units_model)?;
        let power_model = self.power_model()?;
        let power_inputs = selected.to_matrix(power_model.feature_names())?;
        let power = predict_complete(&power_inputs, power_model)?;

        let mut output = ForecastOutput::default();
        for ((row, units), power) in selected.rows().iter().zip(units).zip(power) {
            output.units.push(UnitsForecast {
                site_id: row.record.site_id.clone(),
                date: row.record.date,
                forecast_units: units,
            });
            output.power.push(PowerForecast {
                site_id: row.record.site_id.clone(),
                date: row.record.date,
                forecast_power: power,
            });
        }
        Ok(QueryOutcome::Rows(output))
    }

    /// Scored rows of the query range, flagged or not.
    ///
    /// Statistics run over the site's whole unfiltered history, so the first
    /// days of the range already have a full window behind them. Rows with
    /// zero production are kept: a site that is fully down is exactly what
    /// downtime alerts are for.
    pub fn score_anomalies(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<Vec<AnomalyRow>>> {
        let history: Vec<OperationalRecord> = dataset
            .operations
            .iter()
            .filter(|r| r.site_id == query.site_id)
            .cloned()
            .collect();
        if !history.iter().any(|r| query.matches(&r.site_id, r.date)) {
            debug!(%query, "no operations rows for query");
            return Ok(QueryOutcome::NoData(query.clone()));
        }

        let ordered = OrderedRecords::new(history)?;
        let rows = self
            .detector
            .score(&ordered)
            .into_iter()
            .filter(|r| query.matches(&r.record.site_id, r.record.date))
            .collect();
        Ok(QueryOutcome::Rows(rows))
    }

    /// Flagged rows only. `Rows(vec![])` means the range had data and nothing was anomalous.
    pub fn alerts(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<Vec<AnomalyRow>>> {
        Ok(self
            .score_anomalies(dataset, query)?
            .map(|rows| rows.into_iter().filter(|r| r.is_anomaly).collect()))
    }

    /// [`forecast`](Self::forecast) and write both CSV files to the output directory.
    pub fn run_forecast(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<ForecastFiles>> {
        match self.forecast(dataset, query)? {
            QueryOutcome::Rows(output) => {
                write_forecasts(&self.config.output.dir, &output).map(QueryOutcome::Rows)
            }
            QueryOutcome::NoData(query) => Ok(QueryOutcome::NoData(query)),
        }
    }

    /// [`alerts`](Self::alerts) and write `alerts.csv` to the output directory.
    pub fn run_alerts(
        &self,
        dataset: &Dataset,
        query: &SiteQuery,
    ) -> Result<QueryOutcome<AlertFiles>> {
        match self.alerts(dataset, query)? {
            QueryOutcome::Rows(rows) => {
                write_alerts(&self.config.output.dir, self.detector.signal(), &rows)
                    .map(QueryOutcome::Rows)
            }
            QueryOutcome::NoData(query) => Ok(QueryOutcome::NoData(query)),
        }
    }

    /// Fit the units and power models on the whole dataset and save them to
    /// the configured paths, each with a `.metrics.json` summary beside it.
    pub fn train(&self, dataset: &Dataset) -> Result<Vec<TrainingSummary>> {
        let table = self.feature_table(dataset)?;
        let inputs = &self.config.features.model_inputs;
        let targets = [
            (Signal::UnitsProduced, &self.config.models.units_path),
            (Signal::PowerKwh, &self.config.models.power_path),
        ];

        let mut summaries = Vec::with_capacity(targets.len());
        for (target, path) in targets {
            let (model, summary) = train_model(&table, inputs, target, &self.config.training)?;
            model.save(path)?;
            write_summary(&path.with_extension("metrics.json"), &summary)?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    fn units_model(&self) -> Result<&dyn Regressor> {
        self.units_model
            .get_or_try_init(|| load_model(&self.config.models.units_path, Signal::UnitsProduced))
            .map(|m| &**m)
    }

    fn power_model(&self) -> Result<&dyn Regressor> {
        self.power_model
            .get_or_try_init(|| load_model(&self.config.models.power_path, Signal::PowerKwh))
            .map(|m| &**m)
    }
}

fn load_model(path: &Path, expected: Signal) -> Result<Box<dyn Regressor>> {
    let model = SmartcoreRandomForest::load(path)?;
    if model.metadata.target != expected {
        return Err(PipelineError::Configuration(format!(
            "{} holds a {} model, expected {}",
            path.display(),
            model.metadata.target,
            expected
        )));
    }
    Ok(Box::new(model))
}

fn write_summary(path: &Path, summary: &TrainingSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| PipelineError::Model(format!("failed to encode training summary: {e}")))?;
    std::fs::write(path, json).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ModelMetadata, RowKey, ValidationMetrics};
    use chrono::{Duration, NaiveDate};

    /// Sums its input columns; NaN inputs count as zero.
    struct SumModel {
        metadata: ModelMetadata,
    }

    impl SumModel {
        fn boxed(target: Signal, features: &[String]) -> Box<dyn Regressor> {
            Box::new(Self {
                metadata: ModelMetadata {
                    model_id: format!("sum_{target}"),
                    target,
                    version: "test".to_string(),
                    trained_at: chrono::Utc::now(),
                    training_samples: 0,
                    validation_metrics: ValidationMetrics::new(0.0, 0.0, 0.0, 0.0),
                    feature_names: features.to_vec(),
                },
            })
        }
    }

    impl Regressor for SumModel {
        fn metadata(&self) -> &ModelMetadata {
            &self.metadata
        }

        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
            assert_eq!(features.columns(), self.feature_names());
            Ok(features
                .rows()
                .iter()
                .map(|r| r.iter().filter(|v| v.is_finite()).sum())
                .collect())
        }
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn dataset() -> Dataset {
        let mut operations = Vec::new();
        for (site, base) in [("S1", 100.0), ("S2", 50.0)] {
            for day in 0..20 {
                operations.push(OperationalRecord {
                    site_id: site.to_string(),
                    date: start() + Duration::days(day),
                    units_produced: base + day as f64,
                    power_kwh: base * 4.0,
                    downtime_minutes: if day == 15 { 400.0 } else { 10.0 + (day % 3) as f64 },
                });
            }
        }
        let sites = BTreeMap::from([(
            "S1".to_string(),
            SiteMetadata {
                site_id: "S1".to_string(),
                region: "North".to_string(),
                commissioned_year: 2015,
                shift_hours_per_day: 16.0,
            },
        )]);
        Dataset::new(operations, sites)
    }

    fn pipeline_with(units_features: &[&str]) -> ForecastPipeline {
        pipeline_from(Config::default(), units_features)
    }

    fn pipeline_from(config: Config, units_features: &[&str]) -> ForecastPipeline {
        let features: Vec<String> = units_features.iter().map(|s| s.to_string()).collect();
        ForecastPipeline::new(config).with_models(
            SumModel::boxed(Signal::UnitsProduced, &features),
            SumModel::boxed(Signal::PowerKwh, &["power_kwh_lag1".to_string()]),
        )
    }

    #[test]
    fn test_prepare_features_selects_site_and_range() {
        let pipeline = pipeline_with(&["units_produced_lag1"]);
        let query = SiteQuery::new(
            "S1",
            start() + Duration::days(10),
            start() + Duration::days(12),
        );
        let matrix = pipeline
            .prepare_features(&dataset(), &query)
            .unwrap()
            .rows()
            .unwrap();

        assert_eq!(matrix.len(), 3);
        assert_eq!(matrix.columns(), &Config::default().features.model_inputs[..]);
        assert!(matrix.keys().iter().all(|k| k.site_id == "S1"));
        assert_eq!(matrix.column("units_produced_lag1").unwrap(), vec![109.0, 110.0, 111.0]);
    }

    #[test]
    fn test_forecast_outputs_are_aligned() {
        let pipeline = pipeline_with(&["units_produced_lag1", "region_North"]);
        let query = SiteQuery::new("S1", start() + Duration::days(5), start() + Duration::days(9));
        let output = pipeline.forecast(&dataset(), &query).unwrap().rows().unwrap();

        assert_eq!(output.units.len(), 5);
        assert_eq!(output.power.len(), 5);
        for (u, p) in output.units.iter().zip(&output.power) {
            assert_eq!((&u.site_id, u.date), (&p.site_id, p.date));
        }
        // lag1 + region_North indicator
        assert_eq!(output.units[0].forecast_units, Some(104.0 + 1.0));
        assert_eq!(output.power[0].forecast_power, Some(400.0));
    }

    #[test]
    fn test_forecast_projects_each_model_feature_list() {
        let mut config = Config::default();
        config.features.model_inputs.retain(|c| c != "region_North");
        let pipeline = pipeline_from(config, &["units_produced_lag1", "region_North"]);
        let query = SiteQuery::new("S1", start() + Duration::days(5), start() + Duration::days(5));
        let output = pipeline.forecast(&dataset(), &query).unwrap().rows().unwrap();

        // region_North comes from the table, not zero fill
        assert_eq!(output.units[0].forecast_units, Some(105.0));
    }

    #[test]
    fn test_forecast_leaves_incomplete_rows_empty() {
        let pipeline = pipeline_with(&["units_produced_lag1"]);
        let query = SiteQuery::new("S1", start(), start() + Duration::days(2));
        let output = pipeline.forecast(&dataset(), &query).unwrap().rows().unwrap();

        assert_eq!(output.len(), 3);
        assert_eq!(output.units[0].date, start());
        assert_eq!(output.units[0].forecast_units, None);
        assert_eq!(output.power[0].forecast_power, None);
        assert_eq!(output.units[1].forecast_units, Some(100.0));
        assert_eq!(output.units[2].forecast_units, Some(101.0));
        assert_eq!(output.forecast_count(), 2);
    }

    #[test]
    fn test_predict_complete_all_rows_missing() {
        let model = SumModel::boxed(Signal::UnitsProduced, &["x".to_string()]);
        let matrix = FeatureMatrix::new(
            vec!["x".to_string()],
            vec![vec![f64::NAN], vec![f64::NAN]],
            (0..2)
                .map(|day| RowKey {
                    site_id: "S1".to_string(),
                    date: start() + Duration::days(day),
                })
                .collect(),
        )
        .unwrap();
        assert_eq!(predict_complete(&matrix, model.as_ref()).unwrap(), vec![None, None]);
    }

    #[test]
    fn test_forecast_far_future_is_no_data() {
        let pipeline = pipeline_with(&["units_produced_lag1"]);
        let query = SiteQuery::new(
            "S1",
            NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2099, 1, 2).unwrap(),
        );
        let outcome = pipeline.forecast(&dataset(), &query).unwrap();
        assert_eq!(outcome.map(|o| o.len()), QueryOutcome::NoData(query));
    }

    #[test]
    fn test_missing_model_feature_is_configuration_error() {
        let pipeline = pipeline_with(&["units_produced_lag3"]);
        let query = SiteQuery::new("S1", start(), start() + Duration::days(3));
        let err = pipeline.forecast(&dataset(), &query).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_model_region_columns_outside_vocabulary_zero_fill() {
        let pipeline = pipeline_with(&["units_produced_lag1", "region_Central"]);
        let query = SiteQuery::new("S1", start() + Duration::days(1), start() + Duration::days(1));
        let output = pipeline.forecast(&dataset(), &query).unwrap().rows().unwrap();
        assert_eq!(output.units[0].forecast_units, Some(100.0));
    }

    #[test]
    fn test_alerts_use_history_before_range() {
        let pipeline = pipeline_with(&["units_produced_lag1"]);
        let query = SiteQuery::new(
            "S2",
            start() + Duration::days(15),
            start() + Duration::days(19),
        );
        let alerts = pipeline.alerts(&dataset(), &query).unwrap().rows().unwrap();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].record.date, start() + Duration::days(15));
        assert!(alerts[0].zscore.unwrap() > 3.0);
    }

    #[test]
    fn test_alerts_quiet_range_is_rows_not_no_data() {
        let pipeline = pipeline_with(&["units_produced_lag1"]);
        let query = SiteQuery::new(
            "S1",
            start() + Duration::days(16),
            start() + Duration::days(19),
        );
        let outcome = pipeline.alerts(&dataset(), &query).unwrap();
        assert_eq!(outcome.rows().map(|r| r.len()), Some(0));

        let empty = SiteQuery::new("S3", start(), start() + Duration::days(5));
        assert!(pipeline.alerts(&dataset(), &empty).unwrap().is_no_data());
    }

    #[test]
    fn test_missing_model_file_is_io_error() {
        let mut config = Config::default();
        config.models.units_path = "/no/such/units.bin".into();
        let pipeline = ForecastPipeline::new(config);
        let query = SiteQuery::new(
            "S1",
            start() + Duration::days(10),
            start() + Duration::days(11),
        );
        let err = pipeline.forecast(&dataset(), &query).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
