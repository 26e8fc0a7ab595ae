//! In-process message bus with one unbounded queue per destination.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Message, MessageChannel};

/// Queue-backed [`MessageChannel`].
///
/// Each destination has a single subscriber. Sends never block and never
/// drop a message the subscriber has not yet read: a slow consumer makes
/// its queue grow instead. Messages sent to a destination nobody has
/// subscribed to are dropped.
#[derive(Default)]
pub struct QueueChannel {
    destinations: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
}

impl QueueChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a destination, creating it on demand. A second
    /// subscription replaces the first, whose receiver then ends.
    pub fn subscribe(&self, destination: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .destinations
            .write()
            .insert(destination.to_string(), tx)
            .is_some()
        {
            debug!(destination, "Replaced destination subscriber");
        } else {
            info!(destination, "Created destination");
        }
        rx
    }

    /// Number of live destinations.
    pub fn destination_count(&self) -> usize {
        self.destinations.read().len()
    }
}

impl MessageChannel for QueueChannel {
    fn send(&self, destination: &str, payload: Vec<u8>, headers: HashMap<String, String>) {
        let destinations = self.destinations.read();
        let Some(tx) = destinations.get(destination) else {
            debug!(destination, bytes = payload.len(), "No such destination, dropping");
            return;
        };

        let message = Message {
            destination: destination.to_string(),
            payload,
            headers,
        };
        if tx.send(message).is_err() {
            debug!(destination, "Subscriber gone, dropping message");
        }
    }

    fn close(&self, destination: &str) {
        if self.destinations.write().remove(destination).is_some() {
            debug!(destination, "Removed destination");
        }
    }
}
