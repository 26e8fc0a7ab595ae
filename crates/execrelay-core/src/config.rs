//! Configuration resolution for execrelay.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/execrelay/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete execrelay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub launch: LaunchSection,
    #[serde(default)]
    pub pumps: PumpSection,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            launch: LaunchSection::default(),
            pumps: PumpSection::default(),
            log_level: default_log_level(),
        }
    }
}

/// Socket transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: SocketAddr,
    pub max_sessions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 7878)),
            max_sessions: 64,
        }
    }
}

/// External command launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSection {
    /// Binary invoked for every new command line.
    pub binary: PathBuf,
    /// Wall-clock limit after which the watchdog kills the process.
    pub watchdog_timeout_ms: u64,
    /// Extra environment passed to every process.
    pub env: HashMap<String, String>,
    /// Variable that receives a per-session home directory (e.g. `CF_HOME`).
    pub session_home_var: Option<String>,
    /// Parent directory of the per-session home directories.
    pub session_home_root: Option<PathBuf>,
}

impl Default for LaunchSection {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("cf"),
            watchdog_timeout_ms: 120_000,
            env: HashMap::new(),
            session_home_var: None,
            session_home_root: None,
        }
    }
}

/// Stream pump configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpSection {
    /// Join bound applied per pump on stop; `0` waits forever.
    pub stop_timeout_ms: u64,
    /// Bound on writing one client message to a running process; `0` waits
    /// forever.
    pub input_timeout_ms: u64,
    pub chunk_size: usize,
    /// Session output is published to `<destination_prefix>/<session key>`.
    pub destination_prefix: String,
    /// Publish forwarded client input alongside process output.
    pub echo_input: bool,
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 10_000,
            input_timeout_ms: 10_000,
            chunk_size: 8192,
            destination_prefix: "/broker/out".to_string(),
            echo_input: true,
        }
    }
}

impl Config {
    /// Check values that would make the daemon unusable.
    pub fn validate(&self) -> Result<()> {
        if self.launch.binary.as_os_str().is_empty() {
            return Err(Error::Config("launch.binary must not be empty".into()));
        }
        if self.pumps.chunk_size == 0 {
            return Err(Error::Config("pumps.chunk_size must be positive".into()));
        }
        if self.pumps.destination_prefix.is_empty() {
            return Err(Error::Config(
                "pumps.destination_prefix must not be empty".into(),
            ));
        }
        if self.server.max_sessions == 0 {
            return Err(Error::Config("server.max_sessions must be positive".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    if let Some(path) = explicit {
        let overlay = load_config_file(path)?;
        merge_config(&mut config, overlay);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("execrelay").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, mut overlay: Config) {
    let mut env = std::mem::take(&mut base.launch.env);
    env.extend(std::mem::take(&mut overlay.launch.env));

    base.server = overlay.server;
    base.pumps = overlay.pumps;
    base.log_level = overlay.log_level;
    base.launch = overlay.launch;
    base.launch.env = env;
}

/// Apply `EXECRELAY_*` overrides using the given variable lookup.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("EXECRELAY_ADDR")
        && let Ok(addr) = val.parse()
    {
        config.server.addr = addr;
    }
    if let Some(val) = lookup("EXECRELAY_MAX_SESSIONS")
        && let Ok(n) = val.parse()
    {
        config.server.max_sessions = n;
    }
    if let Some(val) = lookup("EXECRELAY_BINARY") {
        config.launch.binary = PathBuf::from(val);
    }
    if let Some(val) = lookup("EXECRELAY_WATCHDOG_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.launch.watchdog_timeout_ms = n;
    }
    if let Some(val) = lookup("EXECRELAY_SESSION_HOME_ROOT") {
        config.launch.session_home_root = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("EXECRELAY_STOP_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.pumps.stop_timeout_ms = n;
    }
    if let Some(val) = lookup("EXECRELAY_INPUT_TIMEOUT_MS")
        && let Ok(n) = val.parse()
    {
        config.pumps.input_timeout_ms = n;
    }
    if let Some(val) = lookup("EXECRELAY_LOG_LEVEL") {
        config.log_level = val;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.launch.watchdog_timeout_ms, 120_000);
        assert_eq!(config.pumps.destination_prefix, "/broker/out");
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{ "launch": { "binary": "/opt/cf/cf-linux64", "session_home_var": "CF_HOME" } }"#,
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.launch.binary, PathBuf::from("/opt/cf/cf-linux64"));
        assert_eq!(config.launch.session_home_var.as_deref(), Some("CF_HOME"));
        assert_eq!(config.launch.watchdog_timeout_ms, 120_000);
        assert_eq!(config.pumps.chunk_size, 8192);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(load_config_file(&path), Err(Error::Config(_))));
    }

    #[test]
    fn merge_extends_environment() {
        let mut base = Config::default();
        base.launch.env.insert("A".into(), "1".into());
        let mut overlay = Config::default();
        overlay.launch.env.insert("B".into(), "2".into());
        overlay.pumps.stop_timeout_ms = 0;

        merge_config(&mut base, overlay);
        assert_eq!(base.launch.env.len(), 2);
        assert_eq!(base.pumps.stop_timeout_ms, 0);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let mut config = Config::default();
        let vars: HashMap<&str, &str> = [
            ("EXECRELAY_ADDR", "0.0.0.0:9000"),
            ("EXECRELAY_STOP_TIMEOUT_MS", "500"),
            ("EXECRELAY_INPUT_TIMEOUT_MS", "0"),
            ("EXECRELAY_WATCHDOG_TIMEOUT_MS", "soon"),
        ]
        .into_iter()
        .collect();

        apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string));
        assert_eq!(config.server.addr.port(), 9000);
        assert_eq!(config.pumps.stop_timeout_ms, 500);
        assert_eq!(config.pumps.input_timeout_ms, 0);
        assert_eq!(config.launch.watchdog_timeout_ms, 120_000);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let mut config = Config::default();
        config.pumps.chunk_size = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
