//! Session registry keyed by the transport's session key.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::state::Session;
use super::types::{SessionError, SessionStats};

/// Registry of client sessions.
///
/// Each session sits behind its own mutex, so messages for one session are
/// handled one at a time while other sessions proceed independently.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Look up a session.
    pub async fn get(&self, key: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Get or create a session.
    pub async fn get_or_create(&self, key: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        if let Some(session) = self.get(key).await {
            return Ok(session);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(key) {
            return Ok(Arc::clone(session));
        }
        if sessions.len() >= self.max_sessions {
            return Err(SessionError::TooManySessions {
                max: self.max_sessions,
            });
        }

        let session = Arc::new(Mutex::new(Session::new(key)));
        sessions.insert(key.to_string(), Arc::clone(&session));
        drop(sessions);

        info!(session = key, "Created new session");
        Ok(session)
    }

    /// Remove a session, killing its process if one is still running.
    /// Returns whether the session existed.
    pub async fn remove(&self, key: &str) -> bool {
        let removed = self.sessions.write().await.remove(key);
        let Some(session) = removed else {
            return false;
        };

        let session = session.lock().await;
        if session.is_running() {
            info!(session = key, "Killing process of removed session");
            session.terminate();
        }
        debug!(session = key, "Removed session");
        true
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> SessionStats {
        let sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        let mut running = 0;
        for session in &sessions {
            if session.lock().await.is_running() {
                running += 1;
            }
        }
        SessionStats {
            session_count: sessions.len(),
            running,
        }
    }
}
