//! Per-client session state.
//!
//! Each session correlates at most one running process with its watchdog
//! and the live input pipe that client messages are written into.

mod registry;
mod state;
mod types;

pub use registry::SessionRegistry;
pub use state::{Session, SessionInput};
pub use types::{SessionError, SessionStats};
