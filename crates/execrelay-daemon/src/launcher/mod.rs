//! Process launching and supervision.
//!
//! The launcher spawns the external command, wires its three standard
//! streams to a [`PumpManager`](crate::pump::PumpManager), arms a
//! [`Watchdog`], and supervises the process until it exits.

mod process;
mod types;
mod watchdog;

pub use process::ProcessLauncher;
pub use types::{ExecutionResult, LaunchError, LaunchRequest, Launched, Launcher};
pub use watchdog::Watchdog;
pub(crate) use watchdog::Trigger;
