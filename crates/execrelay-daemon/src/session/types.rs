//! Session types.

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions known to the registry.
    pub session_count: usize,
    /// Sessions with a process still being watched.
    pub running: usize,
}

/// Session errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Too many sessions (max: {max})")]
    TooManySessions { max: usize },

    #[error("No process is accepting input for session {session_key}")]
    NoInput { session_key: String },

    #[error("Input for session {session_key} not accepted within {timeout_ms} ms")]
    InputTimeout { session_key: String, timeout_ms: u64 },

    #[error("Failed to write input for session {session_key}: {source}")]
    InputWrite {
        session_key: String,
        #[source]
        source: std::io::Error,
    },
}
