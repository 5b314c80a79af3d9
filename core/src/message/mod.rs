// Message module — signaling envelopes and their text codec

pub mod codec;
pub mod types;

pub use codec::{decode, decode_server, encode, encode_client, CodecError, Envelope};
pub use types::{ClientMessage, IceCandidate, ParticipantInfo, Role, ServerMessage};
