//! Addressable, push-only output bus.
//!
//! Pumps publish process output to a destination; whatever transport owns
//! the destination relays it to the remote client.

mod queue;

pub use queue::QueueChannel;

use std::collections::HashMap;

/// A single payload addressed to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub destination: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

/// Send side of the message bus.
///
/// `send` must never block on the remote client: delivery is fire-and-forget
/// and no acknowledgement is observed by the caller.
pub trait MessageChannel: Send + Sync {
    fn send(&self, destination: &str, payload: Vec<u8>, headers: HashMap<String, String>);

    /// Drop all state held for a destination. Default is a no-op.
    fn close(&self, _destination: &str) {}
}
