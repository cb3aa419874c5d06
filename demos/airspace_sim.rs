//! Airspace allocation demo: load a scenario, run the allocator, write a summary

use airspace_alloc::config::{ScenarioConfig, load};
use airspace_alloc::logger;
use airspace_alloc::report::{build_report, write_report_json};
use airspace_alloc::{AgentStatus, SeededSource, allocate};
use chrono::Local;
use clap::Parser;
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(default)]
struct OutputConfig {
    dir: String,
    use_timestamp: bool,
    timestamp_fmt: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "results".to_string(),
            use_timestamp: true,
            timestamp_fmt: "%Y-%m-%d_%H-%M-%S".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SimConfig {
    scenario: ScenarioConfig,
    output_config: OutputConfig,
    log_level: Option<String>,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (.pkl or .json)
    #[arg(long, default_value = "demos/scenario.json")]
    config: String,

    /// Seed for budgets and exit draws (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Log filter, e.g. "info,auction=debug" (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = &cli.config;
    let mut config: SimConfig = match load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", config_path, e);
            return Err(e.into());
        }
    };
    if let Some(seed) = cli.seed {
        config.scenario.seed = seed;
    }

    let output = &config.output_config;
    let result_dir = if output.use_timestamp {
        let date_str = Local::now().format(&output.timestamp_fmt).to_string();
        Path::new(&output.dir).join(date_str)
    } else {
        Path::new(&output.dir).to_path_buf()
    };
    std::fs::create_dir_all(&result_dir)?;

    let level = cli
        .log_level
        .or(config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let log_path = result_dir.join("simulation.log");
    let _guard = logger::init(Some(log_path.as_path()), &level)?;

    info!("Loaded configuration from {}", config_path);
    info!("Results will be saved to: {}", result_dir.display());

    let (grid, agents) = config.scenario.build()?;
    let scenario_path = result_dir.join("agents.json");
    if let Err(e) = std::fs::write(&scenario_path, serde_json::to_string_pretty(&agents)?) {
        warn!("Failed to save agent list: {}", e);
    }

    let run_start = Instant::now();
    let mut source = SeededSource::new(config.scenario.seed);
    let result = allocate(&grid, &agents, &config.scenario.params, &mut source)?;

    info!(
        "{} assigned, {} exited, {} unassigned after {} auction rounds",
        result.count(AgentStatus::Assigned),
        result.count(AgentStatus::Exited),
        result.count(AgentStatus::Unassigned),
        result.rounds.len()
    );

    let report = build_report(&result, run_start);
    let summary_path = write_report_json(&report, &result_dir)?;
    info!("JSON summary saved to {}", summary_path.display());

    Ok(())
}
