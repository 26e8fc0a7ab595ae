//! Single-direction byte pump.
//!
//! A [`Pump`] copies one byte source into an optional sink until the source
//! is exhausted, optionally publishing every chunk to the message channel.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::channel::MessageChannel;

pub type BoxedSource = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Default read size per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Which process stream a pump serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
    Stdin,
}

impl StreamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Stdin => "stdin",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared byte sink.
///
/// Cloning shares the underlying writer, so the pump manager can flush a
/// sink while a pump still owns a handle to it.
#[derive(Clone)]
pub struct OutputSink {
    writer: Arc<Mutex<BoxedSink>>,
    pipe: bool,
}

impl OutputSink {
    /// Wrap an arbitrary writer.
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            pipe: false,
        }
    }

    /// Wrap the write end of a pipe pair. Pumps close such sinks once their
    /// source is exhausted so the paired read end observes end-of-stream.
    pub fn pipe(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            pipe: true,
            ..Self::new(writer)
        }
    }

    pub const fn is_pipe(&self) -> bool {
        self.pipe
    }

    /// Whether both handles refer to the same writer.
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.writer, &other.writer)
    }

    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await?;
        writer.flush().await
    }

    pub async fn flush(&self) -> io::Result<()> {
        self.writer.lock().await.flush().await
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("pipe", &self.pipe)
            .finish_non_exhaustive()
    }
}

/// Where a pump publishes the chunks it moves.
#[derive(Clone)]
pub struct Forward {
    channel: Arc<dyn MessageChannel>,
    destination: String,
    headers: HashMap<String, String>,
}

impl Forward {
    pub fn new(channel: Arc<dyn MessageChannel>, destination: impl Into<String>) -> Self {
        Self {
            channel,
            destination: destination.into(),
            headers: HashMap::new(),
        }
    }

    /// Attach a header sent with every chunk.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    fn deliver(&self, kind: StreamKind, chunk: &[u8]) {
        let mut headers = self.headers.clone();
        headers.insert("stream".to_string(), kind.as_str().to_string());
        self.channel.send(&self.destination, chunk.to_vec(), headers);
    }
}

impl fmt::Debug for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forward")
            .field("destination", &self.destination)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// One directional copy task.
pub struct Pump {
    kind: StreamKind,
    source: BoxedSource,
    sink: Option<OutputSink>,
    close_sink_when_exhausted: bool,
    forward: Option<Forward>,
    stop: Option<watch::Receiver<bool>>,
    chunk_size: usize,
}

impl Pump {
    pub fn new(
        kind: StreamKind,
        source: impl AsyncRead + Send + Unpin + 'static,
        sink: Option<OutputSink>,
        close_sink_when_exhausted: bool,
    ) -> Self {
        Self {
            kind,
            source: Box::new(source),
            sink,
            close_sink_when_exhausted,
            forward: None,
            stop: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Publish every chunk to the given forwarding target.
    #[must_use]
    pub fn with_forward(mut self, forward: Forward) -> Self {
        self.forward = Some(forward);
        self
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make the pump honour a cooperative stop signal: once `true` is sent
    /// (or the sender is dropped) a pending read returns immediately and the
    /// pump finishes as if its source were exhausted.
    #[must_use]
    pub fn stoppable(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    pub const fn closes_sink_when_exhausted(&self) -> bool {
        self.close_sink_when_exhausted
    }

    pub const fn forwards(&self) -> bool {
        self.forward.is_some()
    }

    /// Run until the source is exhausted, a stop is signalled, or an I/O
    /// error occurs. Returns the number of bytes moved.
    pub async fn run(mut self) -> io::Result<u64> {
        let outcome = self.copy().await;
        if let Err(ref e) = outcome {
            debug!(stream = %self.kind, error = %e, "Pump aborted by I/O error");
        }

        if self.close_sink_when_exhausted
            && let Some(sink) = &self.sink
            && let Err(e) = sink.shutdown().await
        {
            warn!(stream = %self.kind, error = %e, "Got exception while closing sink");
        }

        outcome
    }

    async fn copy(&mut self) -> io::Result<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut total: u64 = 0;

        while let Some(n) = self.read_chunk(&mut buf).await? {
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            if let Some(sink) = &self.sink {
                sink.write_all(chunk).await?;
            }
            if let Some(forward) = &self.forward {
                forward.deliver(self.kind, chunk);
            }
            total += n as u64;
        }

        Ok(total)
    }

    /// `Ok(None)` means a stop was requested.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let Some(stop) = self.stop.as_mut() else {
            return self.source.read(buf).await.map(Some);
        };
        if *stop.borrow_and_update() {
            return Ok(None);
        }

        tokio::select! {
            biased;
            _ = stop.changed() => Ok(None),
            read = self.source.read(buf) => read.map(Some),
        }
    }
}

impl fmt::Debug for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("kind", &self.kind)
            .field("sink", &self.sink)
            .field("close_sink_when_exhausted", &self.close_sink_when_exhausted)
            .field("forward", &self.forward)
            .finish_non_exhaustive()
    }
}
