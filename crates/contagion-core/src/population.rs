//! Agent storage and the shared healthy/infected tallies.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use tracing::warn;

use crate::{Agent, AgentId, AgentView, HealthState};

/// Signed change applied to the aggregate counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountDelta {
    pub healthy: i64,
    pub infected: i64,
}

impl CountDelta {
    /// Susceptible agent became infected.
    pub const SICKEN: Self = Self::new(-1, 1);
    /// Infected agent recovered.
    pub const RECOVER: Self = Self::new(1, -1);

    #[must_use]
    pub const fn new(healthy: i64, infected: i64) -> Self {
        Self { healthy, infected }
    }

    /// Delta for `count` agents created in `state`.
    #[must_use]
    pub fn arrivals(state: HealthState, count: u32) -> Self {
        let count = i64::from(count);
        if state.is_healthy() {
            Self::new(count, 0)
        } else {
            Self::new(0, count)
        }
    }
}

/// Aggregate counts observed after a delta was applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountTally {
    pub healthy: i64,
    pub infected: i64,
}

impl CountTally {
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.healthy + self.infected
    }
}

/// Display collaborator notified of every counter change.
///
/// Called while the counter lock is held, so deltas arrive in the order they
/// were applied. A panicking sink is logged and skipped; the tally it was
/// shown has already been committed.
pub trait CountSink: Send + Sync {
    fn on_delta(&self, delta: CountDelta, totals: CountTally);

    /// The population was cleared and both counts are zero again.
    fn on_reset(&self) {}
}

/// No-op count sink.
#[derive(Debug, Default)]
pub struct NullCountSink;

impl CountSink for NullCountSink {
    fn on_delta(&self, _delta: CountDelta, _totals: CountTally) {}
}

/// Mutex-guarded healthy/infected tallies.
pub struct Counters {
    tally: Mutex<CountTally>,
    sink: Arc<dyn CountSink>,
}

impl std::fmt::Debug for Counters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counters")
            .field("tally", &self.snapshot())
            .finish()
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new(Arc::new(NullCountSink))
    }
}

impl Counters {
    #[must_use]
    pub fn new(sink: Arc<dyn CountSink>) -> Self {
        Self {
            tally: Mutex::new(CountTally::default()),
            sink,
        }
    }

    /// Apply `delta` to both counts as one update and forward it to the sink.
    ///
    /// Always returns once the tally is updated, even if the sink panics, so
    /// the caller's matching state write is never skipped.
    pub fn add_delta(&self, delta: CountDelta) -> CountTally {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        tally.healthy += delta.healthy;
        tally.infected += delta.infected;
        let totals = *tally;
        if panic::catch_unwind(AssertUnwindSafe(|| self.sink.on_delta(delta, totals))).is_err() {
            warn!(?delta, ?totals, "count sink panicked; tally kept");
        }
        totals
    }

    #[must_use]
    pub fn snapshot(&self) -> CountTally {
        *self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reset(&self) {
        let mut tally = self.tally.lock().unwrap_or_else(PoisonError::into_inner);
        *tally = CountTally::default();
        if panic::catch_unwind(AssertUnwindSafe(|| self.sink.on_reset())).is_err() {
            warn!("count sink panicked on reset; tally cleared");
        }
    }
}

/// Per-state totals recomputed from agent states.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Census {
    pub susceptible: usize,
    pub infected: usize,
    pub recovered: usize,
}

impl Census {
    #[must_use]
    pub const fn healthy(&self) -> usize {
        self.susceptible + self.recovered
    }
}

/// Ordered agent collection plus the counters describing it.
#[derive(Debug, Default)]
pub struct Population {
    slots: SlotMap<AgentId, usize>,
    agents: Vec<Agent>,
    counters: Counters,
}

impl Population {
    #[must_use]
    pub fn new(sink: Arc<dyn CountSink>) -> Self {
        Self {
            slots: SlotMap::with_key(),
            agents: Vec::new(),
            counters: Counters::new(sink),
        }
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents in insertion order.
    #[must_use]
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> + '_ {
        self.agents.iter()
    }

    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.index_of(id).map(|index| &self.agents[index])
    }

    #[must_use]
    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        let index = self.index_of(id)?;
        self.agents.get_mut(index)
    }

    #[must_use]
    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    #[must_use]
    pub fn tally(&self) -> CountTally {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn healthy_count(&self) -> i64 {
        self.tally().healthy
    }

    #[must_use]
    pub fn infected_count(&self) -> i64 {
        self.tally().infected
    }

    /// Recount states directly from the agents.
    #[must_use]
    pub fn census(&self) -> Census {
        self.agents
            .iter()
            .fold(Census::default(), |mut census, agent| {
                match agent.state() {
                    HealthState::Susceptible => census.susceptible += 1,
                    HealthState::Infected => census.infected += 1,
                    HealthState::Recovered => census.recovered += 1,
                }
                census
            })
    }

    /// Snapshot of every agent for drawing.
    #[must_use]
    pub fn views(&self) -> Vec<AgentView> {
        self.agents.iter().map(Agent::view).collect()
    }

    /// Append `count` agents built by `make`, then record their arrival in the counters.
    pub(crate) fn extend_with<F>(
        &mut self,
        state: HealthState,
        count: u32,
        mut make: F,
    ) -> Vec<AgentId>
    where
        F: FnMut(AgentId) -> Agent,
    {
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = self.slots.insert(self.agents.len());
            self.agents.push(make(id));
            ids.push(id);
        }
        self.counters.add_delta(CountDelta::arrivals(state, count));
        ids
    }

    /// Disjoint borrows used by the tick phases.
    pub(crate) fn split_mut(&mut self) -> (&mut [Agent], &Counters) {
        (&mut self.agents, &self.counters)
    }

    /// Drop every agent and zero both counts.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.agents.clear();
        self.counters.reset();
    }
}
