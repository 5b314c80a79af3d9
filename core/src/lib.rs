// ConfSignal Core — signaling client for conferencing sessions
//
// Relays offers, answers and ICE candidates between local peer-connection
// engines and a remote coordinator. Media itself never passes through here.

pub mod call;
pub mod capability;
pub mod engine;
pub mod message;
pub mod orchestrator;
pub mod session;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use thiserror::Error;

pub use call::{Affordances, CallMachine, CallState, CallStatus, CallTrigger};
pub use capability::{
    CapabilityError, Direction, MediaBinding, MediaDevices, MediaElement, MediaStream, OnIceCandidate,
    PeerConnection, PeerConnectionFactory,
};
pub use message::{ClientMessage, CodecError, IceCandidate, ParticipantInfo, Role, ServerMessage};
pub use orchestrator::{Notice, NoticeLevel, Orchestrator, OrchestratorConfig, Shape, UserAction};
pub use session::{PeerSession, RegistryError, SessionPhase, SessionRegistry};
pub use transport::{SignalConnection, TransportError, TransportEvent};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Everything the signaling layer reports upward
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    #[error("Unrecognized message kind: {0}")]
    UnrecognizedMessage(String),
    #[error("Session already registered for {0}")]
    DuplicateSession(String),
    #[error("No session for {0}")]
    NotFound(String),
    #[error("Negotiation with {identity} failed: {reason}")]
    NegotiationFailure { identity: String, reason: String },
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<CodecError> for SignalError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(reason) => SignalError::MalformedMessage(reason),
            CodecError::Unrecognized(kind) => SignalError::UnrecognizedMessage(kind),
        }
    }
}

impl From<RegistryError> for SignalError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateSession(identity) => SignalError::DuplicateSession(identity),
            RegistryError::NotFound(identity) => SignalError::NotFound(identity),
        }
    }
}

impl From<TransportError> for SignalError {
    fn from(err: TransportError) -> Self {
        SignalError::Transport(err.to_string())
    }
}
