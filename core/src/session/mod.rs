//! Peer sessions and the registry that owns them

pub mod buffer;
pub mod peer;
pub mod registry;

pub use buffer::{BufferOutcome, CandidateBuffer};
pub use peer::{CandidateRoute, PeerSession, SessionError, SessionId, SessionPhase};
pub use registry::{RegistryError, SessionRegistry};
