//! Per-agent health state machine, infection evaluation and movement.

use std::f32::consts::TAU;

use contagion_index::NeighborhoodIndex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    AgentId, CountDelta, Counters, Direction, HealthState, MAX_COOLDOWN, MAX_TIME_INFECTED,
    Position, WorldBounds,
};

/// Result of one infection evaluation: `hits` successful exposures out of
/// `contacts` qualifying infectious neighbors.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exposure {
    pub hits: u32,
    pub contacts: u32,
}

impl Exposure {
    #[must_use]
    pub const fn infected(&self) -> bool {
        self.hits > 0
    }
}

/// What a single health step did to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Recovered agents are never evaluated again.
    Immune,
    /// Cooldown was decremented instead of evaluating.
    CoolingDown,
    /// Infected agent aged by one tick.
    Progressed,
    Recovered,
    Sickened(Exposure),
    /// Infectious contact without infection; cooldown started.
    Exposed(Exposure),
    /// No infectious neighbor in range.
    Isolated,
}

/// Read-only view of the start-of-tick population used for neighbor search.
///
/// Slot `i` of the index corresponds to `ids[i]` and `states[i]`.
pub struct ContactSnapshot<'a> {
    index: &'a dyn NeighborhoodIndex,
    ids: &'a [AgentId],
    states: &'a [HealthState],
    radius: f32,
}

impl<'a> ContactSnapshot<'a> {
    #[must_use]
    pub fn new(
        index: &'a dyn NeighborhoodIndex,
        ids: &'a [AgentId],
        states: &'a [HealthState],
        radius: f32,
    ) -> Self {
        debug_assert_eq!(ids.len(), states.len());
        debug_assert_eq!(ids.len(), index.len());
        Self {
            index,
            ids,
            states,
            radius,
        }
    }

    /// Infected agents other than `id` within the infection radius of `position`.
    #[must_use]
    pub fn count_infected_neighbors(&self, id: AgentId, position: Position) -> u32 {
        let mut count = 0;
        self.index
            .neighbors_within((position.x, position.y), self.radius, &mut |slot, _| {
                if self.states[slot] == HealthState::Infected && self.ids[slot] != id {
                    count += 1;
                }
            });
        count
    }
}

/// A single simulated individual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    id: AgentId,
    pub position: Position,
    pub direction: Direction,
    pub speed: f32,
    pub(crate) state: HealthState,
    infection_probability: f64,
    pub(crate) ticks_infected: u32,
    pub(crate) cooldown_ticks_remaining: u32,
}

/// Drawing payload for one agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentView {
    pub id: AgentId,
    pub position: Position,
    pub state: HealthState,
}

impl Agent {
    /// Agent at a fixed position with an explicit heading and speed.
    #[must_use]
    pub fn new(
        id: AgentId,
        state: HealthState,
        infection_probability: f64,
        position: Position,
        direction: Direction,
        speed: f32,
    ) -> Self {
        Self {
            id,
            position,
            direction,
            speed,
            state,
            infection_probability,
            ticks_infected: 0,
            cooldown_ticks_remaining: 0,
        }
    }

    /// Agent placed uniformly inside the playable area with a random heading.
    pub fn spawn<R: Rng + ?Sized>(
        id: AgentId,
        state: HealthState,
        infection_probability: f64,
        bounds: &WorldBounds,
        direction_magnitude: f32,
        rng: &mut R,
    ) -> Self {
        let position = Position::new(
            rng.random_range(0.0..=bounds.max_spawn_x()),
            rng.random_range(bounds.bottom_margin..=bounds.max_spawn_y()),
        );
        let direction = Direction::from_angle(rng.random_range(0.0..TAU), direction_magnitude);
        let speed = rng.random_range(state.speed_range());
        Self::new(id, state, infection_probability, position, direction, speed)
    }

    #[must_use]
    pub fn id(&self) -> AgentId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> HealthState {
        self.state
    }

    #[must_use]
    pub fn infection_probability(&self) -> f64 {
        self.infection_probability
    }

    #[must_use]
    pub fn ticks_infected(&self) -> u32 {
        self.ticks_infected
    }

    #[must_use]
    pub fn cooldown_ticks_remaining(&self) -> u32 {
        self.cooldown_ticks_remaining
    }

    #[must_use]
    pub fn view(&self) -> AgentView {
        AgentView {
            id: self.id,
            position: self.position,
            state: self.state,
        }
    }

    /// Count infectious neighbors and roll one independent exposure per neighbor.
    pub fn evaluate_infection<R: Rng + ?Sized>(
        &self,
        contacts: &ContactSnapshot<'_>,
        rng: &mut R,
    ) -> Exposure {
        let neighbors = contacts.count_infected_neighbors(self.id, self.position);
        if neighbors == 0 {
            return Exposure::default();
        }
        let hits = (0..neighbors)
            .filter(|_| rng.random_bool(self.infection_probability))
            .count() as u32;
        Exposure {
            hits,
            contacts: neighbors,
        }
    }

    /// Advance the health state machine by one tick.
    pub fn step_health<R: Rng + ?Sized>(
        &mut self,
        contacts: &ContactSnapshot<'_>,
        counters: &Counters,
        rng: &mut R,
    ) -> HealthOutcome {
        match self.state {
            HealthState::Recovered => HealthOutcome::Immune,
            _ if self.cooldown_ticks_remaining > 0 => {
                self.cooldown_ticks_remaining -= 1;
                HealthOutcome::CoolingDown
            }
            HealthState::Infected => {
                self.ticks_infected += 1;
                if self.ticks_infected == MAX_TIME_INFECTED {
                    self.recover(counters, rng);
                    HealthOutcome::Recovered
                } else {
                    HealthOutcome::Progressed
                }
            }
            HealthState::Susceptible => {
                let exposure = self.evaluate_infection(contacts, rng);
                if exposure.infected() {
                    self.sicken(counters, rng);
                    HealthOutcome::Sickened(exposure)
                } else if exposure.contacts > 0 {
                    self.cooldown_ticks_remaining = MAX_COOLDOWN;
                    debug!(
                        agent = ?self.id,
                        contacts = exposure.contacts,
                        "contact with infected neighbors but no infection"
                    );
                    HealthOutcome::Exposed(exposure)
                } else {
                    HealthOutcome::Isolated
                }
            }
        }
    }

    fn sicken<R: Rng + ?Sized>(&mut self, counters: &Counters, rng: &mut R) {
        let speed = rng.random_range(HealthState::Infected.speed_range());
        counters.add_delta(CountDelta::SICKEN);
        self.state = HealthState::Infected;
        self.ticks_infected = 0;
        self.cooldown_ticks_remaining = 0;
        self.speed = speed;
        debug!(agent = ?self.id, speed, "infected");
    }

    fn recover<R: Rng + ?Sized>(&mut self, counters: &Counters, rng: &mut R) {
        debug_assert_eq!(self.ticks_infected, MAX_TIME_INFECTED);
        let speed = rng.random_range(HealthState::Recovered.speed_range());
        counters.add_delta(CountDelta::RECOVER);
        self.state = HealthState::Recovered;
        self.speed = speed;
        debug!(agent = ?self.id, speed, "recovered");
    }

    /// Move one step and reflect off any edge the new position crosses.
    ///
    /// Returns `true` when either direction component was flipped.
    pub fn advance(&mut self, bounds: &WorldBounds) -> bool {
        self.position.x += self.direction.x * self.speed;
        self.position.y += self.direction.y * self.speed;

        let mut bounced = false;
        if self.position.y < bounds.bottom_margin
            || self.position.y + bounds.agent_size > bounds.height
        {
            self.direction.y = -self.direction.y;
            bounced = true;
        }
        if self.position.x < 0.0
            || self.position.x + bounds.agent_size > bounds.width - bounds.side_margin
        {
            self.direction.x = -self.direction.x;
            bounced = true;
        }
        bounced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CountTally, SimulationConfig};
    use contagion_index::QuadTreeIndex;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;
    use slotmap::SlotMap;

    const RADIUS: f32 = 21.0;

    #[derive(Default)]
    struct Field {
        index: QuadTreeIndex,
        ids: Vec<AgentId>,
        states: Vec<HealthState>,
    }

    impl Field {
        fn contacts(&self) -> ContactSnapshot<'_> {
            ContactSnapshot::new(&self.index, &self.ids, &self.states, RADIUS)
        }
    }

    struct Scene {
        keys: SlotMap<AgentId, ()>,
        agents: Vec<Agent>,
        field: Field,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                keys: SlotMap::with_key(),
                agents: Vec::new(),
                field: Field::default(),
            }
        }

        fn place(&mut self, state: HealthState, probability: f64, x: f32, y: f32) -> usize {
            let id = self.keys.insert(());
            self.agents.push(Agent::new(
                id,
                state,
                probability,
                Position::new(x, y),
                Direction::new(1.0, 0.0),
                0.5,
            ));
            self.agents.len() - 1
        }

        fn rebuild(&mut self) {
            let positions: Vec<(f32, f32)> = self
                .agents
                .iter()
                .map(|a| (a.position.x, a.position.y))
                .collect();
            self.field.index.rebuild(&positions).expect("rebuild");
            self.field.ids = self.agents.iter().map(Agent::id).collect();
            self.field.states = self.agents.iter().map(Agent::state).collect();
        }
    }

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(0x5EED)
    }

    fn counters_for(healthy: i64, infected: i64) -> Counters {
        let counters = Counters::default();
        counters.add_delta(CountDelta::new(healthy, infected));
        counters
    }

    #[test]
    fn certain_probability_infects_on_single_contact() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Susceptible, 1.0, 0.0, 0.0);
        scene.place(HealthState::Infected, 1.0, 0.0, RADIUS);
        scene.rebuild();

        let exposure = scene.agents[subject]
            .evaluate_infection(&scene.field.contacts(), &mut rng());
        assert_eq!(exposure, Exposure { hits: 1, contacts: 1 });

        let counters = counters_for(1, 1);
        let outcome = scene.agents[subject]
            .step_health(&scene.field.contacts(), &counters, &mut rng());
        assert_eq!(outcome, HealthOutcome::Sickened(exposure));
        assert_eq!(scene.agents[subject].state(), HealthState::Infected);
        assert!(
            HealthState::Infected
                .speed_range()
                .contains(&scene.agents[subject].speed)
        );
        assert_eq!(counters.snapshot(), CountTally { healthy: 0, infected: 2 });
    }

    #[test]
    fn zero_probability_never_infects() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Susceptible, 0.0, 100.0, 100.0);
        for offset in [-10.0, -5.0, 0.0, 5.0, 10.0] {
            scene.place(HealthState::Infected, 0.0, 100.0 + offset, 110.0);
        }
        scene.rebuild();
        let counters = counters_for(1, 5);
        let mut rng = rng();

        for _ in 0..10 * (MAX_COOLDOWN + 1) {
            scene.agents[subject].step_health(&scene.field.contacts(), &counters, &mut rng);
            assert_eq!(scene.agents[subject].state(), HealthState::Susceptible);
        }
        assert_eq!(counters.snapshot(), CountTally { healthy: 1, infected: 5 });
    }

    #[test]
    fn neighbors_exactly_at_radius_count() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Susceptible, 0.0, 50.0, 50.0);
        scene.place(HealthState::Infected, 0.0, 50.0 + RADIUS, 50.0);
        scene.place(HealthState::Infected, 0.0, 50.0, 50.0 - RADIUS);
        scene.place(HealthState::Infected, 0.0, 50.0 + RADIUS, 50.0 + RADIUS);
        scene.place(HealthState::Susceptible, 0.0, 55.0, 55.0);
        scene.rebuild();

        let exposure = scene.agents[subject]
            .evaluate_infection(&scene.field.contacts(), &mut rng());
        assert_eq!(exposure, Exposure { hits: 0, contacts: 2 });
    }

    #[test]
    fn self_is_excluded_but_coincident_neighbor_counts() {
        let mut scene = Scene::new();
        let infected = scene.place(HealthState::Infected, 0.0, 10.0, 10.0);
        let subject = scene.place(HealthState::Susceptible, 1.0, 10.0, 10.0);
        scene.rebuild();
        let contacts = scene.field.contacts();

        let subject_agent = &scene.agents[subject];
        assert_eq!(
            contacts.count_infected_neighbors(subject_agent.id(), subject_agent.position),
            1
        );
        assert_eq!(
            subject_agent.evaluate_infection(&contacts, &mut rng()),
            Exposure {
                hits: 1,
                contacts: 1
            }
        );
        let infected_agent = &scene.agents[infected];
        assert_eq!(
            contacts.count_infected_neighbors(infected_agent.id(), infected_agent.position),
            0
        );
    }

    #[test]
    fn failed_exposure_starts_cooldown() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Susceptible, 0.0, 0.0, 0.0);
        scene.place(HealthState::Infected, 0.0, 5.0, 0.0);
        scene.rebuild();
        let counters = counters_for(1, 1);
        let mut rng = rng();

        let outcome = scene.agents[subject]
            .step_health(&scene.field.contacts(), &counters, &mut rng);
        assert_eq!(
            outcome,
            HealthOutcome::Exposed(Exposure { hits: 0, contacts: 1 })
        );
        assert_eq!(scene.agents[subject].cooldown_ticks_remaining(), MAX_COOLDOWN);

        // Even a certain infection is not evaluated while cooling down.
        scene.agents[subject].infection_probability = 1.0;
        for remaining in (0..MAX_COOLDOWN).rev() {
            let outcome =
                scene.agents[subject].step_health(&scene.field.contacts(), &counters, &mut rng);
            assert_eq!(outcome, HealthOutcome::CoolingDown);
            assert_eq!(scene.agents[subject].cooldown_ticks_remaining(), remaining);
            assert_eq!(scene.agents[subject].state(), HealthState::Susceptible);
        }
        let outcome = scene.agents[subject]
            .step_health(&scene.field.contacts(), &counters, &mut rng);
        assert!(matches!(outcome, HealthOutcome::Sickened(_)));
    }

    #[test]
    fn no_contact_sets_no_cooldown() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Susceptible, 1.0, 0.0, 0.0);
        scene.place(HealthState::Infected, 1.0, 200.0, 200.0);
        scene.rebuild();
        let counters = counters_for(1, 1);

        let outcome = scene.agents[subject]
            .step_health(&scene.field.contacts(), &counters, &mut rng());
        assert_eq!(outcome, HealthOutcome::Isolated);
        assert_eq!(scene.agents[subject].cooldown_ticks_remaining(), 0);
    }

    #[test]
    fn recovery_happens_exactly_at_threshold() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Infected, 0.5, 0.0, 0.0);
        scene.rebuild();
        let counters = counters_for(0, 1);
        let mut rng = rng();

        scene.agents[subject].ticks_infected = MAX_TIME_INFECTED - 2;
        assert_eq!(
            scene.agents[subject].step_health(&scene.field.contacts(), &counters, &mut rng),
            HealthOutcome::Progressed
        );
        assert_eq!(
            scene.agents[subject].step_health(&scene.field.contacts(), &counters, &mut rng),
            HealthOutcome::Recovered
        );
        let agent = &scene.agents[subject];
        assert_eq!(agent.state(), HealthState::Recovered);
        assert_eq!(agent.ticks_infected(), MAX_TIME_INFECTED);
        assert!(HealthState::Recovered.speed_range().contains(&agent.speed));
        assert_eq!(counters.snapshot(), CountTally { healthy: 1, infected: 0 });

        for _ in 0..5 {
            assert_eq!(
                scene.agents[subject].step_health(&scene.field.contacts(), &counters, &mut rng),
                HealthOutcome::Immune
            );
        }
        assert_eq!(scene.agents[subject].state(), HealthState::Recovered);
    }

    #[test]
    fn recovered_agents_ignore_infected_neighbors() {
        let mut scene = Scene::new();
        let subject = scene.place(HealthState::Recovered, 1.0, 0.0, 0.0);
        scene.place(HealthState::Infected, 1.0, 1.0, 1.0);
        scene.rebuild();
        let counters = counters_for(1, 1);

        let outcome = scene.agents[subject]
            .step_health(&scene.field.contacts(), &counters, &mut rng());
        assert_eq!(outcome, HealthOutcome::Immune);
        assert_eq!(counters.snapshot(), CountTally { healthy: 1, infected: 1 });
    }

    fn open_bounds() -> WorldBounds {
        SimulationConfig {
            world_width: 100.0,
            world_height: 100.0,
            bottom_margin: 10.0,
            side_margin: 20.0,
            agent_size: 5.0,
            ..SimulationConfig::default()
        }
        .validate()
        .expect("bounds")
    }

    #[test]
    fn advance_moves_by_direction_times_speed() {
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        let mut agent = Agent::new(
            keys.insert(()),
            HealthState::Susceptible,
            0.2,
            Position::new(40.0, 40.0),
            Direction::new(4.0, -2.0),
            0.5,
        );
        assert!(!agent.advance(&open_bounds()));
        assert_eq!(agent.position, Position::new(42.0, 39.0));
        assert_eq!(agent.direction, Direction::new(4.0, -2.0));
    }

    #[test]
    fn advance_reflects_after_crossing_each_edge() {
        let bounds = open_bounds();
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        let mut make = |x: f32, y: f32, dx: f32, dy: f32| {
            Agent::new(
                keys.insert(()),
                HealthState::Susceptible,
                0.2,
                Position::new(x, y),
                Direction::new(dx, dy),
                1.0,
            )
        };

        // Right edge sits at width - side_margin = 80 for the agent's right side.
        let mut east = make(74.0, 50.0, 2.0, 0.0);
        assert!(east.advance(&bounds));
        assert_eq!(east.direction, Direction::new(-2.0, 0.0));
        assert_eq!(east.position.x, 76.0);

        let mut west = make(1.0, 50.0, -2.0, 0.0);
        assert!(west.advance(&bounds));
        assert_eq!(west.direction.x, 2.0);

        let mut south = make(50.0, 11.0, 0.0, -2.0);
        assert!(south.advance(&bounds));
        assert_eq!(south.direction.y, 2.0);

        let mut north = make(50.0, 94.0, 0.0, 2.0);
        assert!(north.advance(&bounds));
        assert_eq!(north.direction.y, -2.0);
    }

    #[test]
    fn spawn_places_agents_inside_the_playable_area() {
        let bounds = open_bounds();
        let mut keys: SlotMap<AgentId, ()> = SlotMap::with_key();
        let mut rng = rng();
        for _ in 0..500 {
            let agent = Agent::spawn(
                keys.insert(()),
                HealthState::Infected,
                0.3,
                &bounds,
                4.0,
                &mut rng,
            );
            assert!(agent.position.x >= 0.0 && agent.position.x <= bounds.max_spawn_x());
            assert!(
                agent.position.y >= bounds.bottom_margin
                    && agent.position.y <= bounds.max_spawn_y()
            );
            let magnitude = agent.direction.x.hypot(agent.direction.y);
            assert!((magnitude - 4.0).abs() < 1e-4);
            assert!(HealthState::Infected.speed_range().contains(&agent.speed));
            assert_eq!(agent.infection_probability(), 0.3);
        }
    }
}
