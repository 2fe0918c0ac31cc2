//! Stand-ins for the drawing layer: state colors, count labels and frame capture.

use std::sync::atomic::{AtomicI64, Ordering};

use contagion_core::{
    AgentView, CountDelta, CountSink, CountTally, HealthState, Position, Simulation, Tick,
};
use serde::{Deserialize, Serialize};

/// RGBA color with channels in `[0, 1]`.
pub type Rgba = [f32; 4];

/// Color assigned to each health state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub healthy: Rgba,
    pub infected: Rgba,
    pub recovered: Rgba,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            healthy: [0.0, 0.3, 0.7, 1.0],
            infected: [0.85, 0.07, 0.23, 1.0],
            recovered: [0.0, 0.5, 0.0, 1.0],
        }
    }
}

impl Palette {
    #[must_use]
    pub fn color_for(&self, state: HealthState) -> Rgba {
        match state {
            HealthState::Susceptible => self.healthy,
            HealthState::Infected => self.infected,
            HealthState::Recovered => self.recovered,
        }
    }
}

/// Healthy/infected labels kept current by counter deltas.
#[derive(Debug, Default)]
pub struct DisplayCounts {
    healthy: AtomicI64,
    infected: AtomicI64,
}

impl DisplayCounts {
    #[must_use]
    pub fn tally(&self) -> CountTally {
        CountTally {
            healthy: self.healthy.load(Ordering::Acquire),
            infected: self.infected.load(Ordering::Acquire),
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        let tally = self.tally();
        format!("Healthy: {}  Infected: {}", tally.healthy, tally.infected)
    }
}

impl CountSink for DisplayCounts {
    fn on_delta(&self, _delta: CountDelta, totals: CountTally) {
        self.healthy.store(totals.healthy, Ordering::Release);
        self.infected.store(totals.infected, Ordering::Release);
    }

    fn on_reset(&self) {
        self.healthy.store(0, Ordering::Release);
        self.infected.store(0, Ordering::Release);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sprite {
    pub position: Position,
    pub size: f32,
    pub color: Rgba,
}

/// Everything a renderer needs to draw one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub tick: Tick,
    pub healthy: i64,
    pub infected: i64,
    pub sprites: Vec<Sprite>,
}

impl Frame {
    #[must_use]
    pub fn capture(simulation: &Simulation, palette: &Palette) -> Self {
        let size = simulation.config().agent_size;
        let sprites = simulation
            .views()
            .into_iter()
            .map(|AgentView { position, state, .. }| Sprite {
                position,
                size,
                color: palette.color_for(state),
            })
            .collect();
        Self {
            tick: simulation.tick_count(),
            healthy: simulation.healthy_count(),
            infected: simulation.infected_count(),
            sprites,
        }
    }
}
