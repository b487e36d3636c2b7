//! AQI dashboard for a finished collector run.
//!
//! Renders one map per data kind from the output CSV, plus a raw data table.
//!
//! Usage:
//!   cargo run --bin aqi_dashboard                              # writes aqi_dashboard.html
//!   cargo run --bin aqi_dashboard -- --output maps.html
//!   cargo run --bin aqi_dashboard -- --input ga.csv --serve 8080

use aqmon::dashboard::{self, DEFAULT_DASHBOARD_OUTPUT, DEFAULT_TITLE};
use aqmon::logging::init_logging;
use aqmon::sink::DEFAULT_OUTPUT;
use clap::Parser;
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "aqi_dashboard", version, about = "Render AQI maps from a collector CSV")]
struct Args {
    /// CSV written by the collector
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    input: PathBuf,

    /// Write the page to this HTML file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the page over HTTP on this port instead of writing a file
    #[arg(long, value_name = "PORT", conflicts_with = "output")]
    serve: Option<u16>,

    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,
}

fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = init_logging("info", None) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    if let Some(port) = args.serve {
        dashboard::serve(port, &args.input, &args.title)?;
        return Ok(());
    }

    let output = args.output.unwrap_or_else(|| PathBuf::from(DEFAULT_DASHBOARD_OUTPUT));
    let rows = dashboard::write_dashboard(&args.input, &output, &args.title)?;
    info!("Dashboard with {} rows written to {}", rows, output.display());
    Ok(())
}
