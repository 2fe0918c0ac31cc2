//! Queue carrying control commands from producers to the tick loop.
//!
//! Producers may live on any thread and never block: a full queue rejects the
//! command. The tick loop drains everything queued before each tick.

use std::ops::AddAssign;
use std::sync::Arc;

use contagion_core::{ControlCommand, Simulation, apply_control_command};
use crossfire::mpmc;
use crossfire::{MAsyncTx, MRx, TrySendError, detect_backoff_cfg};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub type CommandSender = MAsyncTx<ControlCommand>;
pub type CommandReceiver = MRx<ControlCommand>;
pub type CommandSubmit = Arc<dyn Fn(ControlCommand) -> Result<(), QueueError> + Send + Sync>;

/// Why a command never reached the queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("command queue is full; retry later")]
    Full,
    #[error("command queue has been closed")]
    Closed,
}

impl<T> From<TrySendError<T>> for QueueError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::Full,
            TrySendError::Disconnected(_) => Self::Closed,
        }
    }
}

/// What one drain pass did with the queued commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    pub applied: usize,
    /// Commands the simulation refused; each is logged where it is applied.
    pub rejected: usize,
    pub resets: usize,
}

impl DrainStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied + self.rejected == 0
    }
}

impl AddAssign for DrainStats {
    fn add_assign(&mut self, other: Self) {
        self.applied += other.applied;
        self.rejected += other.rejected;
        self.resets += other.resets;
    }
}

/// Bounded queue with room for at least one command.
pub fn create_command_bus(capacity: usize) -> (CommandSender, CommandReceiver) {
    detect_backoff_cfg();
    mpmc::bounded_tx_async_rx_blocking(capacity.max(1))
}

/// Apply queued commands in arrival order until the queue is empty.
///
/// A closed queue simply has nothing left to drain.
pub fn drain_pending_commands(
    receiver: &CommandReceiver,
    simulation: &mut Simulation,
) -> DrainStats {
    let mut stats = DrainStats::default();
    while let Ok(command) = receiver.try_recv() {
        let is_reset = matches!(command, ControlCommand::Reset);
        match apply_control_command(simulation, command) {
            Ok(()) => {
                stats.applied += 1;
                stats.resets += usize::from(is_reset);
            }
            Err(_) => stats.rejected += 1,
        }
    }
    if !stats.is_empty() {
        debug!(
            applied = stats.applied,
            rejected = stats.rejected,
            resets = stats.resets,
            "control commands drained"
        );
    }
    stats
}

/// Non-blocking submit closure shared by every producer.
pub fn make_command_submit(sender: CommandSender) -> CommandSubmit {
    Arc::new(move |command: ControlCommand| {
        let kind = command.kind();
        sender.try_send(command).map_err(|err| {
            let reason = QueueError::from(err);
            warn!(command = kind, error = %reason, "control command not queued");
            reason
        })
    })
}
