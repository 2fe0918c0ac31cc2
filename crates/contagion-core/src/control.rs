//! Commands issued by control surfaces and applied between ticks.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{HealthState, Simulation, SimulationConfig, SimulationError};

/// A request from a control surface (buttons, sliders, CLI, scripts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Susceptibility for agents created after this command.
    SetInfectionProbability(f64),
    AddAgents { count: u32, state: HealthState },
    Reset,
    UpdateConfig(Box<SimulationConfig>),
}

impl ControlCommand {
    /// Stable name used in logs, matching the JSON tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SetInfectionProbability(_) => "set_infection_probability",
            Self::AddAgents { .. } => "add_agents",
            Self::Reset => "reset",
            Self::UpdateConfig(_) => "update_config",
        }
    }
}

/// Apply `command` to the simulation. Rejected commands leave it unchanged.
pub fn apply_control_command(
    simulation: &mut Simulation,
    command: ControlCommand,
) -> Result<(), SimulationError> {
    let kind = command.kind();
    let result = match command {
        ControlCommand::SetInfectionProbability(probability) => {
            simulation.set_infection_probability(probability)
        }
        ControlCommand::AddAgents { count, state } => {
            simulation.add_agents(count, state).map(|ids| {
                debug!(added = ids.len(), %state, "agents added by command");
            })
        }
        ControlCommand::Reset => simulation.reset(),
        ControlCommand::UpdateConfig(config) => simulation.update_config(*config),
    };
    if let Err(err) = &result {
        warn!(command = kind, error = %err, "control command rejected");
    }
    result
}
