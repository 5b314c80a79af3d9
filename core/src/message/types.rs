// Signaling envelopes — what travels over the signaling socket

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Room-scope role of a participant.
///
/// The coordinator speaks `"user"` for a publishing participant and
/// `"manager"` for a view-only one; the friendlier names are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    /// Originates one media stream and is rendered by everyone else
    #[default]
    #[serde(rename = "user", alias = "publisher")]
    Publisher,
    /// Originates no media
    #[serde(rename = "manager", alias = "viewer")]
    Viewer,
}

impl Role {
    /// Whether a participant with this role has media to subscribe to
    pub fn publishes(self) -> bool {
        matches!(self, Role::Publisher)
    }

    /// Name used on the wire
    pub fn wire_name(self) -> &'static str {
        match self {
            Role::Publisher => "user",
            Role::Viewer => "manager",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Publisher => write!(f, "publisher"),
            Role::Viewer => write!(f, "viewer"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "publisher" | "user" => Ok(Role::Publisher),
            "viewer" | "manager" => Ok(Role::Viewer),
            other => Err(format!("Unknown role: {} (expected publisher or viewer)", other)),
        }
    }
}

/// A network path descriptor advertised by one side of a peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
        }
    }
}

/// One entry of the participant list sent on join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub name: String,
    #[serde(default)]
    pub role: Role,
}

impl ParticipantInfo {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }
}

/// Messages the coordinator sends to us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join acknowledgment carrying everyone already in the room
    ExistingParticipants {
        #[serde(rename = "data", alias = "participants", default)]
        participants: Vec<ParticipantInfo>,
    },
    #[serde(rename = "newParticipantArrived")]
    NewParticipant {
        name: String,
        #[serde(default)]
        role: Role,
    },
    ParticipantLeft { name: String },
    /// SDP answer for the session negotiated under `name`
    #[serde(rename = "receiveVideoAnswer")]
    NegotiateAnswer {
        name: String,
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },
    /// Remote candidate for the session negotiated under `name`
    #[serde(rename = "iceCandidate")]
    RemoteCandidate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        candidate: IceCandidate,
    },
    /// Answer to a 1:1 `start`
    StartResponse {
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },
    Error { message: String },
}

impl ServerMessage {
    /// Every `id` value the coordinator may send
    pub const KINDS: &'static [&'static str] = &[
        "existingParticipants",
        "newParticipantArrived",
        "participantLeft",
        "receiveVideoAnswer",
        "iceCandidate",
        "startResponse",
        "error",
    ];

    /// Wire discriminator of this message
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ExistingParticipants { .. } => "existingParticipants",
            ServerMessage::NewParticipant { .. } => "newParticipantArrived",
            ServerMessage::ParticipantLeft { .. } => "participantLeft",
            ServerMessage::NegotiateAnswer { .. } => "receiveVideoAnswer",
            ServerMessage::RemoteCandidate { .. } => "iceCandidate",
            ServerMessage::StartResponse { .. } => "startResponse",
            ServerMessage::Error { .. } => "error",
        }
    }
}

/// Messages we send to the coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinRoom { name: String, room: String, role: Role },
    LeaveRoom,
    /// Offer for one room session; `sender` names the session being negotiated
    #[serde(rename = "receiveVideoFrom")]
    Negotiate {
        sender: String,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    /// 1:1 call offer
    Start {
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },
    Stop,
    /// Local candidate for the session negotiated under `name`
    #[serde(rename = "onIceCandidate")]
    LocalCandidate { candidate: IceCandidate, name: String },
}

impl ClientMessage {
    pub const KINDS: &'static [&'static str] = &[
        "joinRoom",
        "leaveRoom",
        "receiveVideoFrom",
        "start",
        "stop",
        "onIceCandidate",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "joinRoom",
            ClientMessage::LeaveRoom => "leaveRoom",
            ClientMessage::Negotiate { .. } => "receiveVideoFrom",
            ClientMessage::Start { .. } => "start",
            ClientMessage::Stop => "stop",
            ClientMessage::LocalCandidate { .. } => "onIceCandidate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("publisher".parse::<Role>().unwrap(), Role::Publisher);
        assert_eq!("USER".parse::<Role>().unwrap(), Role::Publisher);
        assert_eq!("viewer".parse::<Role>().unwrap(), Role::Viewer);
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Viewer);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Publisher).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Viewer).unwrap(), "\"manager\"");
        let viewer: Role = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(viewer, Role::Viewer);
        assert!(Role::Publisher.publishes());
        assert!(!Role::Viewer.publishes());
    }

    #[test]
    fn test_kinds_cover_variants() {
        let msg = ServerMessage::ParticipantLeft { name: "bob".into() };
        assert!(ServerMessage::KINDS.contains(&msg.kind()));
        assert!(ClientMessage::KINDS.contains(&ClientMessage::Stop.kind()));
    }
}
