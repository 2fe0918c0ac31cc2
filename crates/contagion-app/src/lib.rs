//! Headless application plumbing for the contagion simulation.

pub mod command;
pub mod display;
pub mod driver;

pub use command::{
    CommandReceiver, CommandSender, CommandSubmit, DrainStats, QueueError, create_command_bus,
    drain_pending_commands, make_command_submit,
};
pub use display::{DisplayCounts, Frame, Palette, Rgba, Sprite};
pub use driver::{DriverOptions, REALTIME_INTERVAL, RunReport, run};
