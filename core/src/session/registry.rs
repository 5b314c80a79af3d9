// Session registry — at most one peer session per participant identity

use super::peer::{PeerSession, SessionId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Session already registered for {0}")]
    DuplicateSession(String),
    #[error("No session for {0}")]
    NotFound(String),
}

/// Identity → session map. Owned by the orchestrator; built at connect time,
/// cleared on leave or disconnect.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, PeerSession>,
    next_id: SessionId,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id for a session about to be created
    pub fn next_session_id(&mut self) -> SessionId {
        self.next_id += 1;
        self.next_id
    }

    /// Register a session. Refuses to shadow an existing entry; the caller
    /// removes the old one first.
    pub fn add(&mut self, session: PeerSession) -> Result<(), RegistryError> {
        if self.sessions.contains_key(session.identity()) {
            return Err(RegistryError::DuplicateSession(session.identity().to_string()));
        }
        self.sessions.insert(session.identity().to_string(), session);
        Ok(())
    }

    pub fn get(&self, identity: &str) -> Result<&PeerSession, RegistryError> {
        self.sessions
            .get(identity)
            .ok_or_else(|| RegistryError::NotFound(identity.to_string()))
    }

    pub fn get_mut(&mut self, identity: &str) -> Result<&mut PeerSession, RegistryError> {
        self.sessions
            .get_mut(identity)
            .ok_or_else(|| RegistryError::NotFound(identity.to_string()))
    }

    /// The session for `identity`, only if it is still the one numbered `id`
    pub fn live_mut(&mut self, identity: &str, id: SessionId) -> Option<&mut PeerSession> {
        self.sessions
            .get_mut(identity)
            .filter(|session| session.id() == id && !session.is_disposed())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.sessions.contains_key(identity)
    }

    /// Dispose and drop the session. Absent identities are not an error:
    /// leave notifications race with local cleanup.
    pub fn remove(&mut self, identity: &str) -> bool {
        match self.sessions.remove(identity) {
            Some(mut session) => {
                session.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose every session, returning how many there were
    pub fn remove_all(&mut self) -> usize {
        let count = self.sessions.len();
        for (_, mut session) in self.sessions.drain() {
            session.dispose();
        }
        count
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &PeerSession> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
