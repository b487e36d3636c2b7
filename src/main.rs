//! AirNow statewide collector
//!
//! One full pass:
//! 1. Enumerates every ZIP code of the configured state
//! 2. Fetches forecast, current and historical AQI data for each one,
//!    paced under the AirNow hourly request quota
//! 3. Writes one CSV row per pollutant reading
//!
//! Usage:
//!   cargo run --release                                  # aqmon.toml or defaults
//!   cargo run --release -- --state GA --output ga.csv
//!   cargo run --release -- --zips 33101,33130 --kinds current --schema narrow
//!
//! Environment:
//!   AQMON_CONFIG - alternative config file (also read from .env)
//!   RUST_LOG     - log filter, overrides `log_level`

use aqmon::config::{self, AqmonConfig};
use aqmon::ingest::airnow::{AirNowClient, AirNowSettings};
use aqmon::logging::init_logging;
use aqmon::model::DataKind;
use aqmon::pipeline::{Pipeline, PipelineConfig, TransportErrorPolicy};
use aqmon::ratelimit::{RateLimiter, SystemClock};
use aqmon::sink::{CsvSink, OutputSchema};
use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "aqmon", version, about = "Collect AirNow AQI data for every ZIP code of a state")]
struct Cli {
    /// Config file (default: $AQMON_CONFIG, then ./aqmon.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// State name or abbreviation
    #[arg(long)]
    state: Option<String>,

    /// Output CSV path
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    schema: Option<OutputSchema>,

    /// Data kinds to fetch, comma separated (forecast, current, historical)
    #[arg(long, value_delimiter = ',')]
    kinds: Option<Vec<DataKind>>,

    /// Parallel fetch workers
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    api_key_file: Option<PathBuf>,

    /// ZIP code lookup table (CSV with zipcode,state[,state_name]) instead of the bundled registry
    #[arg(long)]
    zip_table: Option<PathBuf>,

    /// Explicit ZIP codes, comma separated; overrides any other source
    #[arg(long, value_delimiter = ',')]
    zips: Option<Vec<String>>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// What a network failure does to the run
    #[arg(long, value_enum)]
    transport_errors: Option<TransportErrorPolicy>,
}

impl Cli {
    fn apply(self, config: &mut AqmonConfig) {
        if let Some(state) = self.state {
            config.state = state;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(schema) = self.schema {
            config.schema = schema;
        }
        if let Some(kinds) = self.kinds {
            config.kinds = Some(kinds);
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(path) = self.api_key_file {
            config.api_key_file = path;
        }
        if let Some(table) = self.zip_table {
            config.zip_source.table = Some(table);
            config.zip_source.codes = None;
        }
        if let Some(zips) = self.zips {
            config.zip_source.codes = Some(zips);
        }
        if let Some(path) = self.log_file {
            config.log_file = Some(path);
        }
        if let Some(policy) = self.transport_errors {
            config.transport_errors = policy;
        }
    }
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match load(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.log_level, config.log_file.as_deref()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&config) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn load(cli: Cli) -> Result<AqmonConfig, Box<dyn Error>> {
    let mut config = config::load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn run(config: &AqmonConfig) -> Result<(), Box<dyn Error>> {
    let api_key = config::read_api_key(&config.api_key_file)?;

    let zips = config.zip_source.build()?.zip_codes(&config.state)?;
    info!("Found {} zip codes for {}", zips.len(), config.state);

    let clock = Arc::new(SystemClock::new());
    let limiter = Arc::new(RateLimiter::new(config.rate_limit(), clock.clone()));

    let settings = AirNowSettings {
        base_url: config.base_url.clone(),
        distance_miles: config.distance_miles,
        retry: config.retry_policy(),
        ..AirNowSettings::new(api_key)
    };
    let client = AirNowClient::new(settings, clock)?;

    let pipeline = Pipeline::new(
        client,
        limiter,
        PipelineConfig {
            kinds: config.effective_kinds(),
            historical_date: config.historical_date_for(chrono::Utc::now().date_naive()),
            parameter_filter: config.effective_parameter_filter(),
            transport_errors: config.transport_errors,
            workers: config.workers,
        },
    );

    let mut sink = CsvSink::create(&config.output, config.schema)?;
    let summary = pipeline.run(&zips, &mut sink)?;
    let rows = sink.finish()?;

    info!(
        "Data successfully written to {} ({} rows, {} requests)",
        config.output.display(),
        rows,
        pipeline.limiter().total_requests()
    );
    if summary.rows_filtered > 0 {
        info!("{} rows dropped by the parameter filter", summary.rows_filtered);
    }
    Ok(())
}
