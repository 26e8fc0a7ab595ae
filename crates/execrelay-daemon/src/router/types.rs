//! Router types.

use std::collections::HashMap;
use std::path::PathBuf;

use execrelay_core::Config;

use crate::launcher::LaunchError;
use crate::session::SessionError;

/// Launch and pump settings applied to every session.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub binary: PathBuf,
    pub watchdog_timeout_ms: u64,
    pub env: HashMap<String, String>,
    pub session_home_var: Option<String>,
    pub session_home_root: Option<PathBuf>,
    pub stop_timeout_ms: u64,
    /// Bound on writing one message to a running process; zero waits forever.
    pub input_timeout_ms: u64,
    pub chunk_size: usize,
    pub destination_prefix: String,
    pub echo_input: bool,
}

impl From<&Config> for RouterConfig {
    fn from(config: &Config) -> Self {
        Self {
            binary: config.launch.binary.clone(),
            watchdog_timeout_ms: config.launch.watchdog_timeout_ms,
            env: config.launch.env.clone(),
            session_home_var: config.launch.session_home_var.clone(),
            session_home_root: config.launch.session_home_root.clone(),
            stop_timeout_ms: config.pumps.stop_timeout_ms,
            input_timeout_ms: config.pumps.input_timeout_ms,
            chunk_size: config.pumps.chunk_size,
            destination_prefix: config.pumps.destination_prefix.clone(),
            echo_input: config.pumps.echo_input,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// What the router did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Written to the running process's input.
    Forwarded { bytes: usize },
    /// Started a new process.
    Launched { pid: Option<u32> },
}

/// Errors from routing a client message.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Invalid session key: {0:?}")]
    InvalidSessionKey(String),
}
