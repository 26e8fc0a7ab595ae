//! Routing of client messages to sessions.
//!
//! Glue between:
//! - `SessionRegistry` (per-client state)
//! - `Launcher` + `PumpManager` (process and its stream pumps)
//! - `MessageChannel` (output destination of each session)

mod pipeline;
mod types;

pub use pipeline::Router;
pub use types::{RouteError, Routed, RouterConfig};
