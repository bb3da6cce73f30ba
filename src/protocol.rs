use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::SignalingError;

/// Peer identifier assigned by the server on connect.
///
/// Opaque to the client; valid for the lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Session identifier assigned by the server when a session is created.
///
/// Routing key for all peer messages belonging to that session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Roles a peer can announce via `setPeerStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Producer,
    Listener,
}

impl PeerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerRole::Producer => "producer",
            PeerRole::Listener => "listener",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerRole {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "producer" => Ok(PeerRole::Producer),
            "listener" => Ok(PeerRole::Listener),
            other => Err(SignalingError::InvalidRole(other.to_owned())),
        }
    }
}

/// Peer metadata carried in `setPeerStatus`, `peerStatusChanged` and `list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP description. The `sdp` text is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpMessage {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

/// An ICE candidate. The candidate string is opaque to this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u32,
}

/// Payload of a `peer` message: either an SDP description or an ICE
/// candidate, keyed by `"sdp"` / `"ice"` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerPayload {
    #[serde(rename = "sdp")]
    Sdp(SdpMessage),
    #[serde(rename = "ice")]
    Ice(IceCandidate),
}

/// One producer entry of a `list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerEntry {
    pub id: PeerId,
    pub meta: PeerMeta,
}

/// Messages sent from peer to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Announce this peer's roles and name
    SetPeerStatus {
        peer_id: PeerId,
        roles: Vec<PeerRole>,
        meta: PeerMeta,
    },

    /// Request a session with a producer peer
    StartSession { peer_id: PeerId },

    /// End an existing session
    EndSession { session_id: SessionId },

    /// Forward an SDP/ICE payload to the peer of a session
    Peer {
        session_id: SessionId,
        #[serde(flatten)]
        payload: PeerPayload,
    },

    /// Request the current list of producers
    List,
}

/// Messages sent from server to peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Connection accepted; assigns this peer's identifier
    Welcome { peer_id: PeerId },

    /// A peer announced or changed its status
    PeerStatusChanged {
        peer_id: PeerId,
        roles: Vec<PeerRole>,
        meta: PeerMeta,
    },

    /// A consumer requested a session with us; generate an offer
    StartSession {
        peer_id: PeerId,
        session_id: SessionId,
    },

    /// The session we requested is starting
    SessionStarted {
        peer_id: PeerId,
        session_id: SessionId,
    },

    /// The session ended
    EndSession { session_id: SessionId },

    /// SDP/ICE payload forwarded from the session peer
    Peer {
        session_id: SessionId,
        #[serde(flatten)]
        payload: PeerPayload,
    },

    /// Current list of producers
    List { producers: Vec<ProducerEntry> },

    /// Server-reported error for this peer's session
    Error { details: String },
}

const SERVER_MESSAGE_TYPES: &[&str] = &[
    "welcome",
    "peerStatusChanged",
    "startSession",
    "sessionStarted",
    "endSession",
    "peer",
    "list",
    "error",
];

/// Failure to decode a JSON envelope into a [`ServerMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message has no type field")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("invalid {0} message: {1}")]
    Invalid(&'static str, serde_json::Error),
}

/// Decodes a parsed JSON envelope into a typed server message.
///
/// Unknown `type` values are reported distinctly from envelopes with a known
/// type but missing or malformed fields, so the receive loop can ignore the
/// former and treat the latter as protocol errors.
pub fn decode(value: serde_json::Value) -> Result<ServerMessage, DecodeError> {
    let ty = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    let ty = match SERVER_MESSAGE_TYPES.iter().find(|known| **known == ty) {
        Some(known) => *known,
        None => return Err(DecodeError::UnknownType(ty.to_owned())),
    };

    serde_json::from_value(value).map_err(|e| DecodeError::Invalid(ty, e))
}
