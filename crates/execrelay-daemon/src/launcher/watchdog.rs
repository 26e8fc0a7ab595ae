//! Wall-clock watchdog for a running process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Why the watchdog fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    Expired,
    KillRequested,
}

/// Shared handle to a process watchdog.
///
/// The watchdog is watching from launch until the supervisor has stopped
/// the process's pumps. Sessions only observe it or request a kill; the
/// supervisor is the only one that changes its state.
#[derive(Debug, Clone)]
pub struct Watchdog {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    timeout: Option<Duration>,
    watching: AtomicBool,
    killed: AtomicBool,
    kill: Notify,
}

impl Watchdog {
    /// Arm a watchdog. A zero timeout never expires.
    pub fn new(timeout_ms: u64) -> Self {
        let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        Self {
            inner: Arc::new(Inner {
                timeout,
                watching: AtomicBool::new(true),
                killed: AtomicBool::new(false),
                kill: Notify::new(),
            }),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner.watching.load(Ordering::Acquire)
    }

    /// Whether the process was terminated by this watchdog.
    pub fn killed(&self) -> bool {
        self.inner.killed.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Ask the supervisor to terminate the process now.
    pub fn kill(&self) {
        if self.is_watching() {
            self.inner.kill.notify_one();
        }
    }

    /// Resolves when the timeout expires or a kill is requested.
    pub(crate) async fn fired(&self) -> Trigger {
        let expiry = async {
            match self.inner.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            () = expiry => Trigger::Expired,
            () = self.inner.kill.notified() => Trigger::KillRequested,
        }
    }

    pub(crate) fn mark_killed(&self) {
        self.inner.killed.store(true, Ordering::Release);
    }

    pub(crate) fn stop_watching(&self) {
        self.inner.watching.store(false, Ordering::Release);
    }
}
