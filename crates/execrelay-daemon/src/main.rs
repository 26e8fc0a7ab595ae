//! `execrelay` Daemon
//!
//! Runs an external command-line tool on behalf of remote clients, streaming
//! its output back and feeding client input into the running process.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use execrelay_core::config::load_config;
use execrelay_core::tracing_init::{default_filter, init_tracing};
use execrelay_daemon::channel::QueueChannel;
use execrelay_daemon::launcher::ProcessLauncher;
use execrelay_daemon::router::{Router, RouterConfig};
use execrelay_daemon::server::RelayServer;
use execrelay_daemon::session::SessionRegistry;

#[derive(Parser, Debug)]
#[command(name = "execrelay-daemon")]
#[command(version, about = "execrelay daemon - interactive CLI relay")]
struct Args {
    /// Settings file (JSON), applied over the global settings
    #[arg(long, env = "EXECRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// TCP bind address
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Binary run for every client command
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Watchdog timeout in milliseconds (0 disables the watchdog)
    #[arg(long)]
    watchdog_timeout_ms: Option<u64>,

    /// Pump stop timeout in milliseconds (0 waits forever)
    #[arg(long)]
    stop_timeout_ms: Option<u64>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "EXECRELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(binary) = args.binary {
        config.launch.binary = binary;
    }
    if let Some(ms) = args.watchdog_timeout_ms {
        config.launch.watchdog_timeout_ms = ms;
    }
    if let Some(ms) = args.stop_timeout_ms {
        config.pumps.stop_timeout_ms = ms;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;

    init_tracing(
        &default_filter(env!("CARGO_PKG_NAME"), &config.log_level),
        args.log_json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        binary = %config.launch.binary.display(),
        max_sessions = config.server.max_sessions,
        "Starting execrelay-daemon"
    );

    let channel = Arc::new(QueueChannel::new());
    let registry = Arc::new(SessionRegistry::new(config.server.max_sessions));
    let router = Arc::new(Router::new(
        RouterConfig::from(&config),
        Arc::clone(&registry),
        channel.clone(),
        ProcessLauncher::new(),
    ));
    let server = RelayServer::new(router, channel);

    let listener = RelayServer::<ProcessLauncher>::bind(config.server.addr).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // `true` unsets $NOTIFY_SOCKET so spawned tools don't notify systemd.
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let mut serving = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    let server_exited = tokio::select! {
        joined = &mut serving => {
            joined??;
            true
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            false
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
            false
        }
    };

    if !server_exited {
        let _ = shutdown_tx.send(true);
        serving.await??;
    }

    let stats = registry.stats().await;
    info!(
        sessions = stats.session_count,
        running = stats.running,
        "Daemon stopped"
    );
    Ok(())
}
