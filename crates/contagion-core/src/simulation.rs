//! Tick orchestration: index rebuild, health phase, movement phase.

use std::collections::VecDeque;
use std::sync::Arc;

use contagion_index::NeighborhoodIndex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    Agent, AgentId, AgentView, CancelHandle, ContactSnapshot, CountSink, Exposure, HealthOutcome,
    HealthState, NullCountSink, Population, SimulationConfig, SimulationError, Tick, UnitResult,
    WorkerGauge, WorkerPool, WorldBounds, check_probability,
};

/// Per-tick outcome totals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickSummary {
    pub tick: Tick,
    pub population: usize,
    pub healthy: i64,
    pub infected: i64,
    pub new_infections: usize,
    pub recoveries: usize,
    /// Susceptible agents that met an infectious neighbor but escaped infection.
    pub exposures: usize,
    pub cooling_down: usize,
    pub bounces: usize,
    /// Work units that panicked in either phase.
    pub faults: usize,
    /// Most work units seen running at once during this tick.
    pub peak_active_workers: usize,
}

impl TickSummary {
    fn record_health(&mut self, outcome: HealthOutcome) {
        match outcome {
            HealthOutcome::Sickened(_) => self.new_infections += 1,
            HealthOutcome::Recovered => self.recoveries += 1,
            HealthOutcome::Exposed(_) => self.exposures += 1,
            HealthOutcome::CoolingDown => self.cooling_down += 1,
            HealthOutcome::Immune | HealthOutcome::Progressed | HealthOutcome::Isolated => {}
        }
    }
}

/// Owns the population, spatial index and worker pool, and advances them together.
pub struct Simulation {
    config: SimulationConfig,
    bounds: WorldBounds,
    tick: Tick,
    population: Population,
    index: Box<dyn NeighborhoodIndex>,
    pool: WorkerPool,
    history: VecDeque<TickSummary>,
    positions: Vec<(f32, f32)>,
    ids: Vec<AgentId>,
    states: Vec<HealthState>,
    last_peak: usize,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tick", &self.tick)
            .field("population", &self.population.len())
            .field("counts", &self.population.tally())
            .field("pool", &self.pool)
            .finish()
    }
}

impl Simulation {
    /// Simulation whose count changes go nowhere.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        Self::with_sink(config, Arc::new(NullCountSink))
    }

    /// Simulation forwarding every count change to `sink`.
    pub fn with_sink(
        config: SimulationConfig,
        sink: Arc<dyn CountSink>,
    ) -> Result<Self, SimulationError> {
        let bounds = config.validate()?;
        let pool = WorkerPool::new(config.max_workers, 0)?;
        let index = config.index_kind.build();
        Ok(Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            bounds,
            tick: Tick::zero(),
            population: Population::new(sink),
            index,
            pool,
            positions: Vec::new(),
            ids: Vec::new(),
            states: Vec::new(),
            last_peak: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn bounds(&self) -> &WorldBounds {
        &self.bounds
    }

    /// Ticks completed since construction or the last reset.
    #[must_use]
    pub fn tick_count(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn population(&self) -> &Population {
        &self.population
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.population.get(id)
    }

    /// Mutable access for drivers and tests that place agents explicitly.
    #[must_use]
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.population.get_mut(id)
    }

    #[must_use]
    pub fn views(&self) -> Vec<AgentView> {
        self.population.views()
    }

    #[must_use]
    pub fn healthy_count(&self) -> i64 {
        self.population.healthy_count()
    }

    #[must_use]
    pub fn infected_count(&self) -> i64 {
        self.population.infected_count()
    }

    /// Live count of work units running on the pool.
    ///
    /// `tick` holds `&mut self`, so only a clone of this gauge (read from a
    /// sink or another thread) can see a non-zero value mid-tick. Between
    /// ticks it reads 0; `TickSummary::peak_active_workers` is the per-tick
    /// record. The gauge carries over to pools built by `reset` and
    /// `update_config`.
    #[must_use]
    pub fn worker_gauge(&self) -> WorkerGauge {
        self.pool.worker_gauge()
    }

    /// Handle that cancels the current pool generation from any thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.pool.cancel_handle()
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    #[must_use]
    pub fn last_summary(&self) -> Option<&TickSummary> {
        self.history.back()
    }

    /// Change the susceptibility given to agents created from now on.
    pub fn set_infection_probability(&mut self, probability: f64) -> Result<(), SimulationError> {
        let probability = check_probability(probability)?;
        self.config.infection_probability = probability;
        info!(probability, "infection probability updated");
        Ok(())
    }

    /// Place `count` new agents uniformly inside the playable area.
    pub fn add_agents(
        &mut self,
        count: u32,
        state: HealthState,
    ) -> Result<Vec<AgentId>, SimulationError> {
        if count == 0 {
            return Err(SimulationError::EmptyBatch);
        }
        if state == HealthState::Recovered {
            return Err(SimulationError::InvalidInitialState(state));
        }
        let bounds = self.bounds;
        let probability = self.config.infection_probability;
        let magnitude = self.config.direction_magnitude;
        let mut rng = rand::rng();
        let ids = self.population.extend_with(state, count, |id| {
            Agent::spawn(id, state, probability, &bounds, magnitude, &mut rng)
        });
        info!(
            count,
            %state,
            infection_probability = probability,
            "new {state} individuals with {probability} infection probability"
        );
        Ok(ids)
    }

    /// Replace the configuration, rebuilding the pool or index when their settings changed.
    ///
    /// Outstanding cancel handles keep referring to the replaced pool.
    pub fn update_config(&mut self, config: SimulationConfig) -> Result<(), SimulationError> {
        let bounds = config.validate()?;
        if config.max_workers != self.config.max_workers {
            self.pool = WorkerPool::with_gauge(
                config.max_workers,
                self.pool.generation() + 1,
                self.pool.worker_gauge(),
            )?;
            info!(workers = config.max_workers, "Threads: {}", config.max_workers);
        }
        if config.index_kind != self.config.index_kind {
            self.index = config.index_kind.build();
            debug!(kind = ?config.index_kind, "spatial index replaced");
        }
        while self.history.len() > config.history_capacity {
            self.history.pop_front();
        }
        self.bounds = bounds;
        self.config = config;
        Ok(())
    }

    /// Drop every agent, zero the counts and cancel outstanding work.
    ///
    /// The replacement pool is built before anything is cleared, so a failed
    /// reset leaves the simulation untouched.
    pub fn reset(&mut self) -> Result<(), SimulationError> {
        let pool = WorkerPool::with_gauge(
            self.config.max_workers,
            self.pool.generation() + 1,
            self.pool.worker_gauge(),
        )?;
        let previous = std::mem::replace(&mut self.pool, pool);
        previous.cancel_handle().cancel();
        self.population.clear();
        self.history.clear();
        self.tick = Tick::zero();
        self.last_peak = 0;
        info!(generation = self.pool.generation(), "simulation reset");
        Ok(())
    }

    /// Rebuild the spatial index from the agents' current positions.
    pub fn rebuild_index(&mut self) -> Result<(), SimulationError> {
        self.positions.clear();
        self.ids.clear();
        self.states.clear();
        for agent in self.population.iter() {
            self.positions.push((agent.position.x, agent.position.y));
            self.ids.push(agent.id());
            self.states.push(agent.state());
        }
        self.index.rebuild(&self.positions)?;
        Ok(())
    }

    /// Evaluate infection for one agent against the current positions without changing it.
    pub fn evaluate_infection(&mut self, id: AgentId) -> Result<Option<Exposure>, SimulationError> {
        self.rebuild_index()?;
        let Some(agent) = self.population.get(id) else {
            return Ok(None);
        };
        let contacts = ContactSnapshot::new(
            self.index.as_ref(),
            &self.ids,
            &self.states,
            self.config.infection_radius,
        );
        Ok(Some(agent.evaluate_infection(&contacts, &mut rand::rng())))
    }

    /// Advance the world by one tick.
    ///
    /// Every health unit finishes before any agent moves. A cancelled pool
    /// generation aborts the tick and the tick counter does not advance.
    pub fn tick(&mut self) -> Result<TickSummary, SimulationError> {
        let next = self.tick.next();
        let cancelled = SimulationError::Cancelled {
            tick: next.0,
            generation: self.pool.generation(),
        };
        if self.pool.is_cancelled() {
            return Err(cancelled);
        }
        self.rebuild_index()?;

        let mut summary = TickSummary {
            tick: next,
            ..TickSummary::default()
        };

        let radius = self.config.infection_radius;
        let bounds = self.bounds;
        let (agents, counters) = self.population.split_mut();
        let contacts = ContactSnapshot::new(self.index.as_ref(), &self.ids, &self.states, radius);

        let health = self.pool.run_phase(&mut *agents, |agent| {
            agent.step_health(&contacts, counters, &mut rand::rng())
        });
        for (slot, result) in health.into_iter().enumerate() {
            match result {
                UnitResult::Done(outcome) => summary.record_health(outcome),
                UnitResult::Skipped => {}
                UnitResult::Faulted(message) => {
                    summary.faults += 1;
                    warn!(tick = next.0, slot, %message, "health unit panicked");
                }
            }
        }
        if self.pool.is_cancelled() {
            return Err(cancelled);
        }

        let movement = self.pool.run_phase(agents, |agent| agent.advance(&bounds));
        for (slot, result) in movement.into_iter().enumerate() {
            match result {
                UnitResult::Done(bounced) => summary.bounces += usize::from(bounced),
                UnitResult::Skipped => {}
                UnitResult::Faulted(message) => {
                    summary.faults += 1;
                    warn!(tick = next.0, slot, %message, "movement unit panicked");
                }
            }
        }
        if self.pool.is_cancelled() {
            return Err(cancelled);
        }

        let tally = self.population.tally();
        debug_assert_eq!(tally.total(), self.population.len() as i64);
        summary.population = self.population.len();
        summary.healthy = tally.healthy;
        summary.infected = tally.infected;

        let peak = self.pool.take_peak();
        if peak != self.last_peak {
            debug!(tick = next.0, previous = self.last_peak, peak, "active workers changed");
            self.last_peak = peak;
        }
        summary.peak_active_workers = peak;

        self.tick = next;
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
        Ok(summary)
    }
}
