//! Launcher types.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::pump::PumpManager;

use super::watchdog::Watchdog;

/// What to run.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Session the process belongs to (for diagnostics).
    pub session_key: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Added to the daemon's own environment.
    pub env: HashMap<String, String>,
    /// Watchdog limit; zero disables the watchdog timer.
    pub watchdog_timeout_ms: u64,
}

/// Outcome of one process run, delivered once the process has exited and
/// its pumps have been stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Whether the watchdog killed the process.
    pub killed: bool,
    /// Stop-timeout failure reported by the pump manager, if any.
    pub pump_failure: Option<String>,
}

/// A process that has been started.
#[derive(Debug)]
pub struct Launched {
    pub pid: Option<u32>,
    pub watchdog: Watchdog,
    pub result: oneshot::Receiver<ExecutionResult>,
}

/// Starts processes for the router.
pub trait Launcher: Send + Sync + 'static {
    /// Spawn the process described by `request`, attach its streams to
    /// `pumps`, start pumping, and return without waiting for it to exit.
    fn launch(
        &self,
        request: LaunchRequest,
        pumps: PumpManager,
    ) -> impl Future<Output = Result<Launched, LaunchError>> + Send;
}

/// Errors from launching a process.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to spawn {binary}: {reason}")]
    Spawn { binary: String, reason: String },

    #[error("Process {0} pipe was not captured")]
    MissingPipe(&'static str),
}
