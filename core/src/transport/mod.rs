//! Signaling transport — the bidirectional text channel to the coordinator

pub mod websocket;

pub use websocket::{connect, endpoint_url, ConnectionTasks, SignalConnection, TransportError, SIGNAL_PATH};

/// What the transport delivers to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound text frame, still encoded
    Message(String),
    /// The channel is gone, with the peer's reason if it gave one
    Closed(Option<String>),
}
