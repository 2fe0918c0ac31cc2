//! Core types for the contagion simulation engine.
//!
//! A [`Simulation`] owns a [`Population`] of point agents moving inside a
//! bounded 2D world. Every tick it rebuilds a spatial index from the agents'
//! start-of-tick positions, evaluates infection for every agent on a bounded
//! worker pool, waits for that phase to finish, and then moves every agent.
//! Aggregate healthy/infected counts are only ever changed through
//! [`Counters::add_delta`], which forwards each delta to a [`CountSink`].

use std::ops::Range;

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use thiserror::Error;

pub use contagion_index::{IndexError, IndexKind};

pub mod agent;
pub mod control;
pub mod population;
pub mod pool;
pub mod simulation;

pub use agent::{Agent, AgentView, ContactSnapshot, Exposure, HealthOutcome};
pub use control::{ControlCommand, apply_control_command};
pub use population::{
    Census, CountDelta, CountSink, CountTally, Counters, NullCountSink, Population,
};
pub use pool::{CancelHandle, UnitResult, WorkerGauge, WorkerPool};
pub use simulation::{Simulation, TickSummary};

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    pub struct AgentId;
}

/// Ticks an agent stays infected before it recovers.
pub const MAX_TIME_INFECTED: u32 = 2_000;
/// Ticks an exposed-but-uninfected agent skips infection evaluation.
pub const MAX_COOLDOWN: u32 = 30;
/// Speed range drawn when an agent becomes (or is created) infected.
pub const INFECTED_SPEED: Range<f32> = 0.3..0.8;
/// Speed range drawn for new healthy agents and on recovery.
pub const HEALTHY_SPEED: Range<f32> = 0.5..0.9;

/// High level simulation clock (ticks processed since the last reset).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// World-space coordinate of an agent's bottom-left corner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Per-tick heading; the displacement is `direction * speed`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Direction {
    pub x: f32,
    pub y: f32,
}

impl Direction {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Vector of length `magnitude` rotated `angle` radians from +x.
    #[must_use]
    pub fn from_angle(angle: f32, magnitude: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos * magnitude, sin * magnitude)
    }
}

/// Health state of an agent. `Recovered` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Susceptible,
    Infected,
    Recovered,
}

impl HealthState {
    /// Susceptible and recovered agents both count as healthy.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        !matches!(self, Self::Infected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Susceptible => "susceptible",
            Self::Infected => "infected",
            Self::Recovered => "recovered",
        }
    }

    /// Speed range an agent entering this state draws from.
    #[must_use]
    pub const fn speed_range(self) -> Range<f32> {
        match self {
            Self::Infected => INFECTED_SPEED,
            Self::Susceptible | Self::Recovered => HEALTHY_SPEED,
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the simulation engine.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("infection probability {0} must be within [0, 1]")]
    InvalidProbability(f64),
    #[error("agent count must be positive")]
    EmptyBatch,
    #[error("agents cannot be created in the {0} state")]
    InvalidInitialState(HealthState),
    /// The spatial index could not be rebuilt; the tick was aborted.
    #[error("spatial index rebuild failed: {0}")]
    Index(#[from] IndexError),
    #[error("worker pool construction failed: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    /// Work for this pool generation was cancelled before the tick completed.
    #[error("tick {tick} cancelled (pool generation {generation})")]
    Cancelled { tick: u64, generation: u64 },
}

pub(crate) fn check_probability(probability: f64) -> Result<f64, SimulationError> {
    if (0.0..=1.0).contains(&probability) {
        Ok(probability)
    } else {
        Err(SimulationError::InvalidProbability(probability))
    }
}

/// Static configuration for a simulation world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Width of the world in world units.
    pub world_width: f32,
    /// Height of the world in world units.
    pub world_height: f32,
    /// Band at the bottom of the world reserved for UI; agents bounce off its top edge.
    pub bottom_margin: f32,
    /// Band at the right of the world reserved for UI.
    pub side_margin: f32,
    /// Side length of an agent's square footprint.
    pub agent_size: f32,
    /// Maximum distance at which an infected agent exposes a susceptible one.
    pub infection_radius: f32,
    /// Susceptibility assigned to newly created agents.
    pub infection_probability: f64,
    /// Upper bound on concurrently running work units.
    pub max_workers: usize,
    /// Length of the direction vector assigned at creation.
    pub direction_magnitude: f32,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
    /// Spatial index used for neighbor queries.
    pub index_kind: IndexKind,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            world_width: 800.0,
            world_height: 600.0,
            bottom_margin: 120.0,
            side_margin: 80.0,
            agent_size: 21.0,
            infection_radius: 21.0,
            infection_probability: 0.2,
            max_workers: 4,
            direction_magnitude: 4.0,
            history_capacity: 256,
            index_kind: IndexKind::Quadtree,
        }
    }
}

impl SimulationConfig {
    /// Validates the configuration, returning the derived world bounds.
    pub fn validate(&self) -> Result<WorldBounds, SimulationError> {
        let finite = [
            self.world_width,
            self.world_height,
            self.bottom_margin,
            self.side_margin,
            self.agent_size,
            self.infection_radius,
            self.direction_magnitude,
        ];
        if finite.iter().any(|value| !value.is_finite()) {
            return Err(SimulationError::InvalidConfig(
                "geometry values must be finite",
            ));
        }
        if self.world_width <= 0.0 || self.world_height <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "world dimensions must be positive",
            ));
        }
        if self.bottom_margin < 0.0 || self.side_margin < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "margins must be non-negative",
            ));
        }
        if self.agent_size <= 0.0 {
            return Err(SimulationError::InvalidConfig("agent_size must be positive"));
        }
        if self.infection_radius < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "infection_radius must be non-negative",
            ));
        }
        if self.direction_magnitude <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "direction_magnitude must be positive",
            ));
        }
        if self.max_workers == 0 {
            return Err(SimulationError::InvalidConfig("max_workers must be non-zero"));
        }
        if self.history_capacity == 0 {
            return Err(SimulationError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        check_probability(self.infection_probability)?;

        let bounds = WorldBounds {
            width: self.world_width,
            height: self.world_height,
            bottom_margin: self.bottom_margin,
            side_margin: self.side_margin,
            agent_size: self.agent_size,
        };
        if bounds.max_spawn_x() < 0.0 || bounds.max_spawn_y() < bounds.bottom_margin {
            return Err(SimulationError::InvalidConfig(
                "margins and agent_size leave no room to place agents",
            ));
        }
        Ok(bounds)
    }
}

/// Playable area used for placement and boundary reflection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WorldBounds {
    pub width: f32,
    pub height: f32,
    pub bottom_margin: f32,
    pub side_margin: f32,
    pub agent_size: f32,
}

impl WorldBounds {
    /// Rightmost x at which a new agent's footprint still fits.
    #[must_use]
    pub fn max_spawn_x(&self) -> f32 {
        self.width - self.side_margin - self.agent_size
    }

    /// Topmost y at which a new agent's footprint still fits.
    #[must_use]
    pub fn max_spawn_y(&self) -> f32 {
        self.height - self.agent_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let bounds = SimulationConfig::default().validate().expect("valid");
        assert_eq!(bounds.max_spawn_x(), 699.0);
        assert_eq!(bounds.max_spawn_y(), 579.0);
    }

    #[test]
    fn config_rejects_out_of_range_probability() {
        let config = SimulationConfig {
            infection_probability: 1.5,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimulationError::InvalidProbability(p)) if p == 1.5
        ));
    }

    #[test]
    fn config_rejects_margins_that_swallow_the_world() {
        let config = SimulationConfig {
            world_width: 100.0,
            side_margin: 90.0,
            agent_size: 20.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_round_trips_through_partial_json() {
        let config: SimulationConfig =
            serde_json::from_str(r#"{"max_workers": 8, "index_kind": "linear_scan"}"#)
                .expect("parse");
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.index_kind, IndexKind::LinearScan);
        assert_eq!(config.world_width, SimulationConfig::default().world_width);
    }

    #[test]
    fn healthy_states_count_recovered() {
        assert!(HealthState::Susceptible.is_healthy());
        assert!(HealthState::Recovered.is_healthy());
        assert!(!HealthState::Infected.is_healthy());
        assert_eq!(HealthState::Infected.speed_range(), INFECTED_SPEED);
    }
}
