mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use netlab_abstract::scenario::Scenario;
use netlab_sim::SimulationReport;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Discrete-event network simulator")]
struct Args {
    /// Path to the scenario TOML file to execute.
    #[arg(long)]
    scenario: PathBuf,

    /// Override the scenario's random seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Write one CSV file per recorded metric series into this directory.
    #[arg(long)]
    csv_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("netlab-sim-cli starting...");

    let mut scenario = load_scenario(&args.scenario)?;
    if let Some(seed) = args.seed {
        scenario.seed = seed;
    }
    let base_dir = args
        .scenario
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let report = runner::run_scenario(&scenario, &base_dir)?;

    if let Some(path) = &args.trace_out {
        write_trace(path, &report)?;
    }
    if let Some(dir) = &args.csv_dir {
        write_csv_series(dir, &report)?;
    }
    log_summary(&report);
    Ok(())
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file {}", path.display()))?;
    let scenario: Scenario = toml::from_str(&content).context("failed to parse scenario file")?;
    Ok(scenario)
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("failed to serialize trace")?;
    fs::write(path, &data).with_context(|| format!("failed to write trace {}", path.display()))?;
    Ok(())
}

/// One `<metric>.csv` per series, e.g. `n1.cwnd.csv` with `time,value` rows.
fn write_csv_series(dir: &Path, report: &SimulationReport) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create csv directory {}", dir.display()))?;
    for (name, series) in &report.metrics {
        let mut csv = String::from("time,value\n");
        for (time, value) in series {
            csv.push_str(&format!("{time},{value}\n"));
        }
        let path = dir.join(format!("{name}.csv"));
        fs::write(&path, csv)
            .with_context(|| format!("failed to write csv {}", path.display()))?;
    }
    Ok(())
}

fn log_summary(report: &SimulationReport) {
    info!(
        "Simulation duration: {:.3} s | receptions: {} | drops: {} | streams delivered: {}",
        report.duration,
        report.receptions.len(),
        report.drops.len(),
        report.delivered.len()
    );
}
