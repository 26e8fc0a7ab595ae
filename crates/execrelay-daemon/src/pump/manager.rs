//! Pump manager: one set of stream pumps per process invocation.
//!
//! The manager wires a process's stdout, stderr and stdin to pumps, starts
//! them as independent tasks, and shuts them down with a bounded join.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::unit::{BoxedSource, DEFAULT_CHUNK_SIZE, Forward, OutputSink, Pump, StreamKind};

/// Extra time granted on top of the stop timeout before a join is declared
/// to have exceeded it.
pub const STOP_TIMEOUT_ADDITION: Duration = Duration::from_millis(2000);

/// Pump manager errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PumpError {
    #[error("The stop timeout of {timeout_ms} ms was exceeded")]
    StopTimeout { timeout_ms: u64 },
}

struct Worker {
    kind: StreamKind,
    handle: JoinHandle<io::Result<u64>>,
}

/// Owns the pumps created for a single process.
///
/// Lifecycle: `attach_*` while wiring the process, [`start`](Self::start)
/// once, then [`stop`](Self::stop), which consumes the manager.
pub struct PumpManager {
    out: Option<OutputSink>,
    err: Option<OutputSink>,
    input: Option<BoxedSource>,
    forward: Option<Forward>,
    echo_input: bool,
    stop_timeout_ms: u64,
    chunk_size: usize,
    pending: Vec<Pump>,
    input_stop: Option<watch::Sender<bool>>,
    workers: Vec<Worker>,
}

impl PumpManager {
    /// Create a manager copying process output into `out` and `err`.
    /// `None` discards the stream locally (it is still forwarded if a
    /// forwarding target is set).
    pub fn new(out: Option<OutputSink>, err: Option<OutputSink>) -> Self {
        Self {
            out,
            err,
            input: None,
            forward: None,
            echo_input: false,
            stop_timeout_ms: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pending: Vec::new(),
            input_stop: None,
            workers: Vec::new(),
        }
    }

    /// Client-side source whose bytes are fed into the process's stdin.
    #[must_use]
    pub fn with_input(mut self, input: impl AsyncRead + Send + Unpin + 'static) -> Self {
        self.input = Some(Box::new(input));
        self
    }

    /// Publish process output to the message channel.
    #[must_use]
    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.forward = Some(forward);
        self
    }

    /// Also publish forwarded client input.
    #[must_use]
    pub const fn echo_input(mut self, echo: bool) -> Self {
        self.echo_input = echo;
        self
    }

    /// Join bound per pump on stop; zero waits forever.
    #[must_use]
    pub const fn with_stop_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stop_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub const fn stop_timeout_ms(&self) -> u64 {
        self.stop_timeout_ms
    }

    /// Number of pumps created so far (pending or running).
    pub fn pump_count(&self) -> usize {
        self.pending.len() + self.workers.len()
    }

    /// Attach the process's standard output.
    pub fn attach_output(&mut self, source: impl AsyncRead + Send + Unpin + 'static) {
        let pump = self.output_pump(StreamKind::Stdout, source, self.out.clone());
        self.pending.push(pump);
    }

    /// Attach the process's standard error.
    pub fn attach_error(&mut self, source: impl AsyncRead + Send + Unpin + 'static) {
        let pump = self.output_pump(StreamKind::Stderr, source, self.err.clone());
        self.pending.push(pump);
    }

    /// Attach the writer feeding the process's standard input.
    ///
    /// Without a client input source the process input is closed right away
    /// so the process never waits on it.
    pub async fn attach_input(&mut self, mut sink: impl AsyncWrite + Send + Unpin + 'static) {
        let Some(input) = self.input.take() else {
            if let Err(e) = sink.shutdown().await {
                warn!(error = %e, "Got exception while closing process input");
            }
            return;
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut pump = Pump::new(StreamKind::Stdin, input, Some(OutputSink::new(sink)), true)
            .with_chunk_size(self.chunk_size)
            .stoppable(stop_rx);
        if self.echo_input
            && let Some(forward) = &self.forward
        {
            pump = pump.with_forward(forward.clone());
        }

        self.input_stop = Some(stop_tx);
        self.pending.push(pump);
    }

    fn output_pump(
        &self,
        kind: StreamKind,
        source: impl AsyncRead + Send + Unpin + 'static,
        sink: Option<OutputSink>,
    ) -> Pump {
        let close = sink.as_ref().is_some_and(OutputSink::is_pipe);
        let mut pump = Pump::new(kind, source, sink, close).with_chunk_size(self.chunk_size);
        if let Some(forward) = &self.forward {
            pump = pump.with_forward(forward.clone());
        }
        pump
    }

    /// Start every attached pump as an independent task.
    pub fn start(&mut self) {
        for pump in self.pending.drain(..) {
            let kind = pump.kind();
            debug!(stream = %kind, forwards = pump.forwards(), "Starting pump");
            self.workers.push(Worker {
                kind,
                handle: tokio::spawn(pump.run()),
            });
        }
    }

    /// Stop pumping.
    ///
    /// Signals the client-input pump, joins every pump (each bounded by the
    /// stop timeout plus [`STOP_TIMEOUT_ADDITION`]), flushes the error and
    /// output sinks, and finally reports the first join that timed out.
    /// Every pump is joined even after a timeout.
    pub async fn stop(mut self) -> Result<(), PumpError> {
        if let Some(stop) = self.input_stop.take() {
            let _ = stop.send(true);
        }

        let mut first_failure = None;
        for worker in std::mem::take(&mut self.workers) {
            if let Err(e) = stop_worker(worker, self.stop_timeout_ms).await {
                first_failure.get_or_insert(e);
            }
        }

        if let Some(err) = &self.err
            && !self.out.as_ref().is_some_and(|out| out.same_as(err))
            && let Err(e) = err.flush().await
        {
            warn!(error = %e, "Got exception while flushing the error stream");
        }
        if let Some(out) = &self.out
            && let Err(e) = out.flush().await
        {
            warn!(error = %e, "Got exception while flushing the output stream");
        }

        first_failure.map_or(Ok(()), Err)
    }
}

async fn stop_worker(worker: Worker, timeout_ms: u64) -> Result<(), PumpError> {
    let Worker { kind, mut handle } = worker;

    let joined = if timeout_ms == 0 {
        (&mut handle).await
    } else {
        let bound = Duration::from_millis(timeout_ms) + STOP_TIMEOUT_ADDITION;
        if let Ok(joined) = tokio::time::timeout(bound, &mut handle).await {
            joined
        } else {
            warn!(stream = %kind, timeout_ms, "Pump did not stop in time, aborting");
            handle.abort();
            return Err(PumpError::StopTimeout { timeout_ms });
        }
    };

    match joined {
        Ok(Ok(bytes)) => debug!(stream = %kind, bytes, "Pump finished"),
        Ok(Err(e)) => warn!(stream = %kind, error = %e, "Pump terminated by I/O error"),
        Err(e) => warn!(stream = %kind, error = %e, "Pump task did not complete"),
    }
    Ok(())
}

impl std::fmt::Debug for PumpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpManager")
            .field("stop_timeout_ms", &self.stop_timeout_ms)
            .field("pending", &self.pending.len())
            .field("running", &self.workers.len())
            .finish_non_exhaustive()
    }
}
