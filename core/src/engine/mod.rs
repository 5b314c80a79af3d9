//! Concrete peer-connection engines

#[cfg(feature = "webrtc-engine")]
pub mod webrtc;

#[cfg(feature = "webrtc-engine")]
pub use self::webrtc::{WebRtcEngine, WebRtcPeer};
