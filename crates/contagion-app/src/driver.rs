//! Fixed-cadence tick loop standing in for the UI clock.

use std::thread;
use std::time::{Duration, Instant};

use contagion_core::{Simulation, SimulationError};
use serde::Serialize;
use tracing::{info, warn};

use crate::command::{CommandReceiver, DrainStats, drain_pending_commands};

/// Frame interval of the interactive UI clock.
pub const REALTIME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 60);

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    /// Tick attempts to make before returning.
    pub ticks: u64,
    /// Sleep out the remainder of each 60 Hz frame.
    pub realtime: bool,
    /// Log a progress line every this many completed ticks; 0 disables it.
    pub report_every: u64,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            ticks: 600,
            realtime: false,
            report_every: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub ticks_completed: u64,
    pub failed_ticks: u64,
    pub commands_applied: usize,
    pub commands_rejected: usize,
    pub new_infections: usize,
    pub recoveries: usize,
    pub faults: usize,
    pub healthy: i64,
    pub infected: i64,
    pub elapsed_ms: u128,
}

impl RunReport {
    fn absorb(&mut self, drained: DrainStats) {
        self.commands_applied += drained.applied;
        self.commands_rejected += drained.rejected;
    }
}

/// Apply pending commands and tick the simulation `options.ticks` times.
///
/// A failed tick is logged and the loop carries on, so a queued reset can
/// recover a cancelled generation.
pub fn run(
    simulation: &mut Simulation,
    commands: &CommandReceiver,
    options: DriverOptions,
) -> RunReport {
    let started = Instant::now();
    let mut report = RunReport::default();

    for _ in 0..options.ticks {
        let frame_start = Instant::now();
        report.absorb(drain_pending_commands(commands, simulation));

        match simulation.tick() {
            Ok(summary) => {
                report.ticks_completed += 1;
                report.new_infections += summary.new_infections;
                report.recoveries += summary.recoveries;
                report.faults += summary.faults;
                if options.report_every > 0 && summary.tick.0 % options.report_every == 0 {
                    info!(
                        tick = summary.tick.0,
                        healthy = summary.healthy,
                        infected = summary.infected,
                        new_infections = summary.new_infections,
                        recoveries = summary.recoveries,
                        peak_workers = summary.peak_active_workers,
                        "tick report"
                    );
                }
            }
            Err(err @ SimulationError::Cancelled { .. }) => {
                report.failed_ticks += 1;
                warn!(error = %err, "tick cancelled; waiting for reset");
            }
            Err(err) => {
                report.failed_ticks += 1;
                warn!(error = %err, "tick failed; retrying next frame");
            }
        }

        if options.realtime
            && let Some(remaining) = REALTIME_INTERVAL.checked_sub(frame_start.elapsed())
        {
            thread::sleep(remaining);
        }
    }

    report.absorb(drain_pending_commands(commands, simulation));
    report.healthy = simulation.healthy_count();
    report.infected = simulation.infected_count();
    report.elapsed_ms = started.elapsed().as_millis();
    report
}
