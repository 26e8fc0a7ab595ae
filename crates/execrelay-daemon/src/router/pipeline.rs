//! Session routing: client message → running process input or new launch.
//!
//! Data flow:
//! ```text
//! message ─┬─ process running ──→ session input pipe → stdin pump → process stdin
//!          └─ otherwise ────────→ launch → stdout/stderr pumps → channel destination
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::input::{CommandLine, parse_input};
use crate::launcher::{ExecutionResult, LaunchRequest, Launcher};
use crate::pump::{Forward, PumpManager};
use crate::session::SessionRegistry;

use super::types::{RouteError, Routed, RouterConfig};

/// Buffer of each session's input pipe.
const INPUT_PIPE_CAPACITY: usize = 64 * 1024;

/// Session keys name per-session directories, so they must be a single
/// plain path component.
fn is_valid_session_key(key: &str) -> bool {
    !key.is_empty() && key != "." && key != ".." && !key.contains(['/', '\\', '\0'])
}

/// Routes client messages for all sessions.
pub struct Router<L> {
    config: RouterConfig,
    registry: Arc<SessionRegistry>,
    channel: Arc<dyn MessageChannel>,
    launcher: L,
}

impl<L: Launcher> Router<L> {
    pub fn new(
        config: RouterConfig,
        registry: Arc<SessionRegistry>,
        channel: Arc<dyn MessageChannel>,
        launcher: L,
    ) -> Self {
        Self {
            config,
            registry,
            channel,
            launcher,
        }
    }

    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Output destination of a session.
    pub fn destination(&self, session_key: &str) -> String {
        format!(
            "{}/{session_key}",
            self.config.destination_prefix.trim_end_matches('/')
        )
    }

    /// Handle one client message.
    ///
    /// If the session's process is still being watched the message is input
    /// for it; otherwise the message is a command line and starts a new
    /// process whose state replaces the previous one.
    pub async fn route(&self, session_key: &str, message: &str) -> Result<Routed, RouteError> {
        if !is_valid_session_key(session_key) {
            return Err(RouteError::InvalidSessionKey(session_key.to_string()));
        }

        let session = self.registry.get_or_create(session_key).await?;
        let mut session = session.lock().await;

        if session.is_running() {
            let input = session.input()?;
            // A process that stops reading must not hold up eviction.
            drop(session);

            let bytes = parse_input(message);
            input.write(&bytes, self.config.input_timeout_ms).await?;
            debug!(session = session_key, bytes = bytes.len(), "Forwarded input");
            return Ok(Routed::Forwarded { bytes: bytes.len() });
        }

        let command = CommandLine::parse(message).ok_or(RouteError::EmptyCommand)?;
        let destination = self.destination(session_key);
        let (client_input, process_input) = tokio::io::duplex(INPUT_PIPE_CAPACITY);

        let forward = Forward::new(Arc::clone(&self.channel), destination.clone())
            .with_header("session", session_key);
        let pumps = PumpManager::new(None, None)
            .with_input(process_input)
            .with_forward(forward)
            .echo_input(self.config.echo_input)
            .with_stop_timeout_ms(self.config.stop_timeout_ms)
            .with_chunk_size(self.config.chunk_size);

        let request = LaunchRequest {
            session_key: session_key.to_string(),
            binary: self.config.binary.clone(),
            args: command.args.clone(),
            env: self.environment(session_key).await,
            watchdog_timeout_ms: self.config.watchdog_timeout_ms,
        };
        let launched = self.launcher.launch(request, pumps).await?;

        self.spawn_exit_notifier(session_key.to_string(), destination, launched.result);
        info!(session = session_key, command = %command, pid = ?launched.pid, "Launched process");
        session.record_launch(
            launched.watchdog,
            client_input,
            self.config.binary.clone(),
            command,
        );

        Ok(Routed::Launched { pid: launched.pid })
    }

    /// Forget a session whose client went away, killing its process.
    pub async fn disconnect(&self, session_key: &str) {
        if self.registry.remove(session_key).await {
            info!(session = session_key, "Session closed");
        }
        self.channel.close(&self.destination(session_key));
    }

    async fn environment(&self, session_key: &str) -> HashMap<String, String> {
        let mut env = self.config.env.clone();
        if let (Some(var), Some(root)) = (
            self.config.session_home_var.as_ref(),
            self.config.session_home_root.as_ref(),
        ) {
            let home = root.join(session_key);
            if let Err(e) = tokio::fs::create_dir_all(&home).await {
                warn!(session = session_key, path = %home.display(), error = %e, "Failed to create session home");
            }
            env.insert(var.clone(), home.display().to_string());
        }
        env
    }

    /// Publish an `exit` event once the process has finished and its output
    /// has been fully pumped.
    fn spawn_exit_notifier(
        &self,
        session_key: String,
        destination: String,
        result: oneshot::Receiver<ExecutionResult>,
    ) {
        let channel = Arc::clone(&self.channel);
        tokio::spawn(async move {
            let Ok(result) = result.await else {
                debug!(session = %session_key, "Supervisor went away without a result");
                return;
            };

            let mut headers = HashMap::from([
                ("event".to_string(), "exit".to_string()),
                ("session".to_string(), session_key),
                ("killed".to_string(), result.killed.to_string()),
            ]);
            if let Some(code) = result.exit_code {
                headers.insert("exit_code".to_string(), code.to_string());
            }
            if let Some(failure) = result.pump_failure {
                headers.insert("error".to_string(), failure);
            }
            channel.send(&destination, Vec::new(), headers);
        });
    }
}
