use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use site_forecast::config::Config;
use site_forecast::domain::{QueryOutcome, SiteQuery};
use site_forecast::forecast::{Dataset, ForecastPipeline};
use site_forecast::ml::training::TrainingSummary;
use site_forecast::{loader, telemetry, PipelineError};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; missing files fall back to defaults
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forecast units and power for one site over a date range
    Forecast(QueryArgs),
    /// List downtime anomalies for one site over a date range
    Alert(QueryArgs),
    /// Fit both models on the configured dataset and save them
    Train,
}

#[derive(clap::Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    site: String,
    /// First day, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    start: NaiveDate,
    /// Last day, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    end: NaiveDate,
}

impl QueryArgs {
    fn query(&self) -> Result<SiteQuery> {
        if self.start > self.end {
            anyhow::bail!("--start {} is after --end {}", self.start, self.end);
        }
        Ok(SiteQuery::new(self.site.clone(), self.start, self.end))
    }
}

fn parse_day(raw: &str) -> std::result::Result<NaiveDate, String> {
    loader::parse_date(raw).ok_or_else(|| format!("'{raw}' is not a date"))
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_tracing(cli.log_json);

    run(cli).inspect_err(|e| match e.downcast_ref::<PipelineError>() {
        Some(pipeline) => error!(kind = pipeline.kind(), "{pipeline}"),
        None => error!("{e:#}"),
    })
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let dataset = Dataset::load(&config.data)?;
    let pipeline = ForecastPipeline::new(config);

    match cli.command {
        Commands::Forecast(args) => {
            let query = args.query()?;
            match pipeline.run_forecast(&dataset, &query)? {
                QueryOutcome::Rows(files) => {
                    println!(
                        "Wrote {} forecast rows to {} and {}",
                        files.rows,
                        files.units_path.display(),
                        files.power_path.display()
                    );
                }
                QueryOutcome::NoData(query) => {
                    warn!(%query, "no data to forecast");
                    println!("No data for {query}");
                }
            }
        }
        Commands::Alert(args) => {
            let query = args.query()?;
            match pipeline.run_alerts(&dataset, &query)? {
                QueryOutcome::Rows(files) => {
                    println!("Wrote {} alerts to {}", files.alerts, files.path.display());
                }
                QueryOutcome::NoData(query) => {
                    warn!(%query, "no data to score");
                    println!("No data for {query}");
                }
            }
        }
        Commands::Train => {
            let summaries = pipeline.train(&dataset)?;
            for summary in &summaries {
                print_summary(summary);
            }
            info!(models = summaries.len(), "training finished");
        }
    }
    Ok(())
}

fn print_summary(summary: &TrainingSummary) {
    let Some(m) = summary.validation_metrics else {
        println!(
            "{}: {} train rows, no validation split",
            summary.target, summary.training_samples
        );
        return;
    };
    println!(
        "{}: {} train / {} validation rows, MAE {:.3}, RMSE {:.3}, MAPE {:.2}%, R² {:.3}",
        summary.target,
        summary.training_samples,
        summary.validation_samples,
        m.mae,
        m.rmse,
        m.mape,
        m.r2
    );
}
