//! Session state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWrite;

use crate::input::CommandLine;
use crate::launcher::Watchdog;
use crate::pump::OutputSink;

use super::types::SessionError;

/// State of one client session.
pub struct Session {
    key: String,
    /// Watchdog of the current (or last) process.
    watchdog: Option<Watchdog>,
    /// Write end of the current process's input pipe.
    input: Option<OutputSink>,
    binary: Option<PathBuf>,
    last_command: Option<CommandLine>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            watchdog: None,
            input: None,
            binary: None,
            last_command: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether a process is running and accepting input.
    pub fn is_running(&self) -> bool {
        self.watchdog.as_ref().is_some_and(Watchdog::is_watching)
    }

    pub const fn watchdog(&self) -> Option<&Watchdog> {
        self.watchdog.as_ref()
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    pub const fn last_command(&self) -> Option<&CommandLine> {
        self.last_command.as_ref()
    }

    /// Record a newly launched process, replacing whatever ran before.
    pub fn record_launch(
        &mut self,
        watchdog: Watchdog,
        input: impl AsyncWrite + Send + Unpin + 'static,
        binary: PathBuf,
        command: CommandLine,
    ) {
        self.watchdog = Some(watchdog);
        self.input = Some(OutputSink::new(input));
        self.binary = Some(binary);
        self.last_command = Some(command);
    }

    /// Handle to the live input sink, usable after the session lock is
    /// released.
    pub fn input(&self) -> Result<SessionInput, SessionError> {
        let sink = self.input.clone().ok_or_else(|| SessionError::NoInput {
            session_key: self.key.clone(),
        })?;
        Ok(SessionInput {
            session_key: self.key.clone(),
            sink,
        })
    }

    /// Kill the running process, if any.
    pub fn terminate(&self) {
        if let Some(watchdog) = self.watchdog.as_ref().filter(|w| w.is_watching()) {
            watchdog.kill();
        }
    }
}

/// Write side of a session's process input.
#[derive(Debug, Clone)]
pub struct SessionInput {
    session_key: String,
    sink: OutputSink,
}

impl SessionInput {
    /// Write bytes and flush. A non-zero `timeout_ms` bounds the whole
    /// write; on expiry part of `bytes` may already have been written.
    pub async fn write(&self, bytes: &[u8], timeout_ms: u64) -> Result<(), SessionError> {
        let written = if timeout_ms == 0 {
            self.sink.write_all(bytes).await
        } else {
            tokio::time::timeout(Duration::from_millis(timeout_ms), self.sink.write_all(bytes))
                .await
                .map_err(|_| SessionError::InputTimeout {
                    session_key: self.session_key.clone(),
                    timeout_ms,
                })?
        };
        written.map_err(|source| SessionError::InputWrite {
            session_key: self.session_key.clone(),
            source,
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("running", &self.is_running())
            .field("binary", &self.binary)
            .field("last_command", &self.last_command)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn command() -> CommandLine {
        CommandLine::parse("cf login").unwrap()
    }

    #[test]
    fn new_session_is_idle() {
        let session = Session::new("s1");
        assert!(!session.is_running());
        assert!(session.binary().is_none());
        assert!(session.last_command().is_none());
    }

    #[tokio::test]
    async fn input_reaches_live_sink() {
        let (client, mut process) = tokio::io::duplex(64);
        let mut session = Session::new("s1");
        session.record_launch(Watchdog::new(0), client, "cf".into(), command());

        assert!(session.is_running());
        session.input().unwrap().write(b"yes\n", 0).await.unwrap();

        let mut buf = [0u8; 4];
        process.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"yes\n");
    }

    #[test]
    fn input_without_process_fails() {
        let session = Session::new("s1");
        let err = session.input().unwrap_err();
        assert!(matches!(err, SessionError::NoInput { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unread_input_times_out() {
        let (client, _process) = tokio::io::duplex(8);
        let mut session = Session::new("s1");
        session.record_launch(Watchdog::new(0), client, "cf".into(), command());

        let err = session
            .input()
            .unwrap()
            .write(&[b'x'; 64], 250)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::InputTimeout { timeout_ms: 250, .. }
        ));
    }

    #[tokio::test]
    async fn closed_process_input_is_write_error() {
        let (client, process) = tokio::io::duplex(8);
        let mut session = Session::new("s1");
        session.record_launch(Watchdog::new(0), client, "cf".into(), command());
        drop(process);

        let err = session.input().unwrap().write(b"x", 0).await.unwrap_err();
        assert!(matches!(err, SessionError::InputWrite { .. }));
    }

    #[test]
    fn finished_watchdog_means_idle() {
        let (client, _process) = tokio::io::duplex(64);
        let watchdog = Watchdog::new(0);
        let mut session = Session::new("s1");
        session.record_launch(watchdog.clone(), client, "cf".into(), command());

        watchdog.stop_watching();
        assert!(!session.is_running());
        assert_eq!(session.binary(), Some(Path::new("cf")));
    }
}
