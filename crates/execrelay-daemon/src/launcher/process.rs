//! Launches external commands with piped stdio.

use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::pump::PumpManager;

use super::types::{ExecutionResult, LaunchError, LaunchRequest, Launched, Launcher};
use super::watchdog::{Trigger, Watchdog};

/// Launches real OS processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub const fn new() -> Self {
        Self
    }
}

impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        request: LaunchRequest,
        mut pumps: PumpManager,
    ) -> Result<Launched, LaunchError> {
        let mut cmd = Command::new(&request.binary);
        cmd.args(&request.args)
            .envs(&request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            session = %request.session_key,
            binary = %request.binary.display(),
            args = ?request.args,
            "Spawning process"
        );
        let mut child = cmd.spawn().map_err(|e| LaunchError::Spawn {
            binary: request.binary.display().to_string(),
            reason: e.to_string(),
        })?;
        drop(cmd);
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(LaunchError::MissingPipe("stderr"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or(LaunchError::MissingPipe("stdin"))?;

        pumps.attach_output(stdout);
        pumps.attach_error(stderr);
        pumps.attach_input(stdin).await;
        pumps.start();

        let watchdog = Watchdog::new(request.watchdog_timeout_ms);
        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(supervise(
            child,
            pumps,
            watchdog.clone(),
            result_tx,
            request.session_key,
        ));

        Ok(Launched {
            pid,
            watchdog,
            result: result_rx,
        })
    }
}

/// Wait for the process (or the watchdog), stop its pumps, then report.
async fn supervise(
    mut child: Child,
    pumps: PumpManager,
    watchdog: Watchdog,
    result_tx: oneshot::Sender<ExecutionResult>,
    session_key: String,
) {
    let pid = child.id();
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        trigger = watchdog.fired() => {
            match trigger {
                Trigger::Expired => warn!(session = %session_key, ?pid, "Watchdog timeout, killing process"),
                Trigger::KillRequested => info!(session = %session_key, ?pid, "Kill requested"),
            }
            None
        }
    };

    let status = match exited {
        Some(status) => status,
        None => {
            watchdog.mark_killed();
            terminate(&mut child).await
        }
    };

    let exit_code = match status {
        Ok(status) => {
            info!(session = %session_key, ?pid, %status, "Process exited");
            status.code()
        }
        Err(e) => {
            warn!(session = %session_key, ?pid, error = %e, "Error waiting for process");
            None
        }
    };

    let pump_failure = match pumps.stop().await {
        Ok(()) => None,
        Err(e) => {
            warn!(session = %session_key, error = %e, "Pump shutdown failed");
            Some(e.to_string())
        }
    };
    watchdog.stop_watching();

    let result = ExecutionResult {
        exit_code,
        killed: watchdog.killed(),
        pump_failure,
    };
    if result_tx.send(result).is_err() {
        debug!(session = %session_key, "Nobody waiting for execution result");
    }
}

async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "Failed to kill process");
    }
    child.wait().await
}
