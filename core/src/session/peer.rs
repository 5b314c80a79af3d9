// Peer session — one negotiation lifecycle with one remote identity

use super::buffer::MAX_BUFFERED_PER_IDENTITY;
use crate::capability::{Direction, MediaBinding, MediaElement, MediaStream, PeerConnection};
use crate::message::IceCandidate;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Orchestrator-unique session number; completions carry it so late results
/// for a replaced session can be recognised.
pub type SessionId = u64;

/// Negotiation phase of a registered session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Registered; capability handle being created or offer being generated
    Pending,
    /// Offer relayed, waiting for the answer
    OfferSent,
    /// Answer applied
    Active,
    Disposed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Pending => write!(f, "pending"),
            SessionPhase::OfferSent => write!(f, "offer-sent"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::Disposed => write!(f, "disposed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session {0} is disposed")]
    Disposed(String),
    #[error("Session {0} already has a capability handle")]
    HandleExists(String),
    #[error("Session {identity} cannot move from {from} to {to}")]
    InvalidPhase {
        identity: String,
        from: SessionPhase,
        to: SessionPhase,
    },
}

/// Where an inbound remote candidate went
pub enum CandidateRoute {
    /// Handle exists; apply now
    Apply {
        handle: Arc<dyn PeerConnection>,
        candidate: IceCandidate,
    },
    /// Held until the handle is created
    Queued,
    /// Session already disposed
    Discarded,
    /// Too many candidates waiting for the handle
    Full,
}

pub struct PeerSession {
    id: SessionId,
    identity: String,
    binding: MediaBinding,
    phase: SessionPhase,
    handle: Option<Arc<dyn PeerConnection>>,
    element: Option<Weak<dyn MediaElement>>,
    queued: Vec<IceCandidate>,
}

impl PeerSession {
    fn new(id: SessionId, identity: String, binding: MediaBinding) -> Self {
        let element = binding.element_ref();
        Self {
            id,
            identity,
            binding,
            phase: SessionPhase::Pending,
            handle: None,
            element,
            queued: Vec::new(),
        }
    }

    /// Local publishing session
    pub fn send_only(
        id: SessionId,
        identity: impl Into<String>,
        stream: MediaStream,
        preview: Option<Arc<dyn MediaElement>>,
    ) -> Self {
        Self::new(id, identity.into(), MediaBinding::SendOnly { stream, preview })
    }

    /// Subscription to a remote publisher
    pub fn receive_only(id: SessionId, identity: impl Into<String>, element: Arc<dyn MediaElement>) -> Self {
        Self::new(id, identity.into(), MediaBinding::ReceiveOnly { element })
    }

    /// 1:1 call session
    pub fn send_receive(
        id: SessionId,
        identity: impl Into<String>,
        stream: MediaStream,
        local: Option<Arc<dyn MediaElement>>,
        remote: Arc<dyn MediaElement>,
    ) -> Self {
        Self::new(id, identity.into(), MediaBinding::SendReceive { stream, local, remote })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn direction(&self) -> Direction {
        self.binding.direction()
    }

    pub fn binding(&self) -> &MediaBinding {
        &self.binding
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_disposed(&self) -> bool {
        self.phase == SessionPhase::Disposed
    }

    /// Still negotiating (not yet active, not disposed)
    pub fn in_flight(&self) -> bool {
        matches!(self.phase, SessionPhase::Pending | SessionPhase::OfferSent)
    }

    pub fn handle(&self) -> Option<Arc<dyn PeerConnection>> {
        self.handle.clone()
    }

    pub fn queued_candidates(&self) -> usize {
        self.queued.len()
    }

    /// Install the capability handle. Happens at most once per session;
    /// returns the candidates that were waiting for it.
    pub fn attach_handle(&mut self, handle: Arc<dyn PeerConnection>) -> Result<Vec<IceCandidate>, SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed(self.identity.clone()));
        }
        if self.handle.is_some() {
            return Err(SessionError::HandleExists(self.identity.clone()));
        }
        self.handle = Some(handle);
        Ok(std::mem::take(&mut self.queued))
    }

    pub fn mark_offer_sent(&mut self) -> Result<(), SessionError> {
        self.advance(SessionPhase::Pending, SessionPhase::OfferSent)
    }

    pub fn mark_active(&mut self) -> Result<(), SessionError> {
        self.advance(SessionPhase::OfferSent, SessionPhase::Active)
    }

    fn advance(&mut self, from: SessionPhase, to: SessionPhase) -> Result<(), SessionError> {
        if self.phase != from || self.handle.is_none() {
            return Err(SessionError::InvalidPhase {
                identity: self.identity.clone(),
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Queue candidates that arrived before this session existed.
    /// Returns how many were dropped for lack of room.
    pub fn adopt_candidates(&mut self, candidates: Vec<IceCandidate>) -> usize {
        if self.is_disposed() {
            return candidates.len();
        }
        let room = MAX_BUFFERED_PER_IDENTITY.saturating_sub(self.queued.len());
        let dropped = candidates.len().saturating_sub(room);
        self.queued.extend(candidates.into_iter().take(room));
        dropped
    }

    pub fn route_candidate(&mut self, candidate: IceCandidate) -> CandidateRoute {
        if self.is_disposed() {
            return CandidateRoute::Discarded;
        }
        match &self.handle {
            Some(handle) => CandidateRoute::Apply {
                handle: Arc::clone(handle),
                candidate,
            },
            None if self.queued.len() >= MAX_BUFFERED_PER_IDENTITY => CandidateRoute::Full,
            None => {
                self.queued.push(candidate);
                CandidateRoute::Queued
            }
        }
    }

    /// Release the capability handle and detach the media element.
    ///
    /// Returns `false` when the session was already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.phase = SessionPhase::Disposed;
        self.queued.clear();

        if let Some(handle) = self.handle.take() {
            handle.dispose();
        }
        if let Some(element) = self.element.take().and_then(|weak| weak.upgrade()) {
            element.detach();
        }
        true
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("direction", &self.direction())
            .field("phase", &self.phase)
            .field("has_handle", &self.handle.is_some())
            .field("queued", &self.queued.len())
            .finish()
    }
}
