use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use contagion_app::{
    DisplayCounts, DriverOptions, Frame, Palette, create_command_bus, make_command_submit, run,
};
use contagion_core::{ControlCommand, HealthState, Simulation, SimulationConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "contagion",
    version,
    about = "Run the contagion epidemic simulation headlessly"
)]
struct Cli {
    /// Susceptible agents placed before the first tick.
    #[arg(long, env = "CONTAGION_HEALTHY", default_value_t = 200)]
    healthy: u32,

    /// Infected agents placed before the first tick.
    #[arg(long, env = "CONTAGION_INFECTED", default_value_t = 5)]
    infected: u32,

    /// Infection probability for the seeded agents (overrides the config file).
    #[arg(long, env = "CONTAGION_PROBABILITY")]
    probability: Option<f64>,

    /// Number of ticks to run.
    #[arg(long, env = "CONTAGION_TICKS", default_value_t = 600)]
    ticks: u64,

    /// Worker threads per phase (overrides the config file).
    #[arg(long, env = "CONTAGION_WORKERS")]
    workers: Option<usize>,

    /// Pace ticks at 60 Hz instead of running flat out.
    #[arg(long, env = "CONTAGION_REALTIME")]
    realtime: bool,

    /// JSON file with a (partial) simulation configuration.
    #[arg(long, env = "CONTAGION_CONFIG")]
    config: Option<PathBuf>,

    /// Log a progress line every N ticks (0 disables).
    #[arg(long, env = "CONTAGION_REPORT_EVERY", default_value_t = 60)]
    report_every: u64,

    /// Write the final frame (sprites and counts) as JSON to this path.
    #[arg(long, env = "CONTAGION_FRAME_OUT")]
    frame_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let counts = Arc::new(DisplayCounts::default());
    let mut simulation = Simulation::with_sink(config, counts.clone())
        .context("failed to construct simulation")?;
    info!(
        workers = simulation.config().max_workers,
        index = ?simulation.config().index_kind,
        "Starting contagion simulation"
    );

    let (sender, receiver) = create_command_bus(64);
    let submit = make_command_submit(sender);
    for (count, state) in [
        (cli.healthy, HealthState::Susceptible),
        (cli.infected, HealthState::Infected),
    ] {
        if count > 0
            && let Err(err) = submit(ControlCommand::AddAgents { count, state })
        {
            warn!(count, %state, error = %err, "seed command was not queued");
        }
    }

    let report = run(
        &mut simulation,
        &receiver,
        DriverOptions {
            ticks: cli.ticks,
            realtime: cli.realtime,
            report_every: cli.report_every,
        },
    );
    info!(
        ticks = report.ticks_completed,
        failed = report.failed_ticks,
        rejected = report.commands_rejected,
        infections = report.new_infections,
        recoveries = report.recoveries,
        elapsed_ms = report.elapsed_ms as u64,
        label = %counts.label(),
        "Simulation finished"
    );

    if let Some(path) = &cli.frame_out {
        let frame = Frame::capture(&simulation, &Palette::default());
        let json = serde_json::to_string_pretty(&frame).context("failed to encode frame")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write frame to {}", path.display()))?;
    }

    println!(
        "{}",
        serde_json::to_string(&report).context("failed to encode run report")?
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<SimulationConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => SimulationConfig::default(),
    };
    if let Some(probability) = cli.probability {
        config.infection_probability = probability;
    }
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    config.validate().context("invalid simulation configuration")?;
    Ok(config)
}
