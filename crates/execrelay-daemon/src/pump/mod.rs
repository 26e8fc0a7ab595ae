//! Stream pumps between a child process and the message channel.
//!
//! - [`Pump`]: copies one byte source into one sink, optionally publishing
//!   each chunk.
//! - [`PumpManager`]: the stdout/stderr/stdin pumps of one process, started
//!   together and stopped with a bounded join.

mod manager;
mod unit;

pub use manager::{PumpError, PumpManager, STOP_TIMEOUT_ADDITION};
pub use unit::{BoxedSink, BoxedSource, DEFAULT_CHUNK_SIZE, Forward, OutputSink, Pump, StreamKind};
