use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use tracing::info;

use qtraj::lines::CountingLineSpec;
use qtraj::zones::LaneZoneSpec;
use qtraj::{analysis, AnalyticsConfig, CalibrationSpec, JsonLinesSource};

#[derive(Parser)]
#[command(
    name = "qtraj",
    about = "Trajectory analytics over multi-object tracker output",
    version
)]
struct Args {
    /// Tracker output, one JSON observation per line
    #[arg(short, long)]
    input: PathBuf,

    /// Analytics configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lane zones (JSON array)
    #[arg(short, long)]
    zones: Option<PathBuf>,

    /// Counting lines (JSON array)
    #[arg(short, long)]
    lines: Option<PathBuf>,

    /// Camera calibration (JSON)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Report destination, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("qtraj=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AnalyticsConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalyticsConfig::default(),
    };

    let zones = match &args.zones {
        Some(path) => read_json::<Vec<LaneZoneSpec>>(path)?
            .iter()
            .map(LaneZoneSpec::build)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let lines = match &args.lines {
        Some(path) => read_json::<Vec<CountingLineSpec>>(path)?
            .iter()
            .map(CountingLineSpec::build)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let calibration = match &args.calibration {
        Some(path) => Some(
            read_json::<CalibrationSpec>(path)?
                .build()
                .context("building calibration")?,
        ),
        None => None,
    };

    let mut source = JsonLinesSource::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let (session, rejected) = analysis::ingest(&mut source, &config);

    info!(
        tracks = session.track_count(),
        observations = session.observation_count(),
        rejected,
        "tracker output loaded"
    );

    let report = analysis::analyze(&session, calibration.as_ref(), &zones, &lines, &config)?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };

    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?
        }
        None => println!("{}", json),
    }

    Ok(())
}
