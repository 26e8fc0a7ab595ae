//! execrelay Daemon Library
//!
//! Bridges interactive command-line processes to remote clients:
//! - Stream pumps between process stdio and the message channel
//! - Process launching with a watchdog
//! - Per-client sessions and message routing
//! - Socket transport for clients

pub mod channel;
pub mod input;
pub mod launcher;
pub mod pump;
pub mod router;
pub mod server;
pub mod session;
