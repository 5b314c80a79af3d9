//! Capability boundary — the peer-connection engine and media collaborators
//!
//! The signaling core never generates SDP or gathers candidates itself. It
//! drives an engine through these traits and treats everything behind them
//! as a black box.

use crate::message::IceCandidate;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// Capture device or engine missing in this runtime
    #[error("Capability unavailable: {0}")]
    Unavailable(String),
    #[error("Operation failed: {0}")]
    Failed(String),
}

/// Media direction of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    SendOnly,
    ReceiveOnly,
    SendReceive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SendOnly => write!(f, "send-only"),
            Direction::ReceiveOnly => write!(f, "receive-only"),
            Direction::SendReceive => write!(f, "send-receive"),
        }
    }
}

/// A locally acquired media stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub id: String,
    pub video: bool,
    pub audio: bool,
}

impl MediaStream {
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            video: true,
            audio: false,
        }
    }
}

/// A render target owned by the presentation layer
#[cfg_attr(test, mockall::automock)]
pub trait MediaElement: Send + Sync {
    fn label(&self) -> String;
    /// A remote track started flowing into this element
    fn attach(&self, track_id: &str);
    fn detach(&self);
}

/// What a new peer connection is wired to
#[derive(Clone)]
pub enum MediaBinding {
    SendOnly {
        stream: MediaStream,
        preview: Option<Arc<dyn MediaElement>>,
    },
    ReceiveOnly {
        element: Arc<dyn MediaElement>,
    },
    SendReceive {
        stream: MediaStream,
        local: Option<Arc<dyn MediaElement>>,
        remote: Arc<dyn MediaElement>,
    },
}

impl MediaBinding {
    pub fn direction(&self) -> Direction {
        match self {
            MediaBinding::SendOnly { .. } => Direction::SendOnly,
            MediaBinding::ReceiveOnly { .. } => Direction::ReceiveOnly,
            MediaBinding::SendReceive { .. } => Direction::SendReceive,
        }
    }

    /// Outbound stream, if this binding sends media
    pub fn stream(&self) -> Option<&MediaStream> {
        match self {
            MediaBinding::SendOnly { stream, .. } | MediaBinding::SendReceive { stream, .. } => Some(stream),
            MediaBinding::ReceiveOnly { .. } => None,
        }
    }

    /// Element that renders what the remote side sends
    pub fn remote_element(&self) -> Option<&Arc<dyn MediaElement>> {
        match self {
            MediaBinding::ReceiveOnly { element } => Some(element),
            MediaBinding::SendReceive { remote, .. } => Some(remote),
            MediaBinding::SendOnly { .. } => None,
        }
    }

    /// Element the session detaches on dispose (non-owning)
    pub(crate) fn element_ref(&self) -> Option<Weak<dyn MediaElement>> {
        match self {
            MediaBinding::SendOnly { preview, .. } => preview.as_ref().map(Arc::downgrade),
            MediaBinding::ReceiveOnly { element } => Some(Arc::downgrade(element)),
            MediaBinding::SendReceive { remote, .. } => Some(Arc::downgrade(remote)),
        }
    }
}

impl fmt::Debug for MediaBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaBinding::SendOnly { stream, .. } => f.debug_struct("SendOnly").field("stream", &stream.id).finish(),
            MediaBinding::ReceiveOnly { element } => f
                .debug_struct("ReceiveOnly")
                .field("element", &element.label())
                .finish(),
            MediaBinding::SendReceive { stream, remote, .. } => f
                .debug_struct("SendReceive")
                .field("stream", &stream.id)
                .field("remote", &remote.label())
                .finish(),
        }
    }
}

/// Called by the engine for every locally gathered candidate
pub type OnIceCandidate = Arc<dyn Fn(IceCandidate) + Send + Sync>;

/// One peer-connection instance inside the engine
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create and apply a local offer, returning its SDP
    async fn generate_offer(&self) -> Result<String, CapabilityError>;

    async fn process_answer(&self, sdp_answer: &str) -> Result<(), CapabilityError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CapabilityError>;

    /// Release the connection. Calling it again is a no-op.
    fn dispose(&self);
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        identity: &str,
        binding: &MediaBinding,
        on_candidate: OnIceCandidate,
    ) -> Result<Arc<dyn PeerConnection>, CapabilityError>;
}

/// Capture devices plus the presentation layer's render targets
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the stream we publish (screen or camera)
    async fn acquire_local(&self) -> Result<MediaStream, CapabilityError>;

    fn local_element(&self) -> Option<Arc<dyn MediaElement>>;

    fn remote_element(&self, identity: &str) -> Arc<dyn MediaElement>;
}
