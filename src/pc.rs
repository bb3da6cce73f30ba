//! Seam to the external peer-connection engine.
//!
//! The signalling core never interprets SDP text or candidate strings; it
//! hands them across this boundary and relays whatever comes back.

use std::sync::Arc;

use async_trait::async_trait;

use crate::client::SignalingClient;
use crate::error::SignalingError;
use crate::protocol::{IceCandidate, PeerId, PeerPayload, SdpMessage, SessionId};

/// Errors surfaced by an engine implementation.
pub type EngineError = Box<dyn std::error::Error + Send + Sync>;

/// One peer connection, owned by the engine.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Produces the local offer (offerer side).
    async fn create_offer(&self) -> Result<SdpMessage, EngineError>;

    /// Applies the remote offer and produces the local answer (answerer side).
    async fn create_answer(&self, remote_offer: &SdpMessage) -> Result<SdpMessage, EngineError>;

    /// Applies the remote answer (offerer side).
    async fn set_remote_description(&self, sdp: &SdpMessage) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError>;

    async fn close(&self);
}

/// Session-setup hook invoked for every session the server starts.
///
/// The implementation constructs a peer connection and wires its local
/// ICE-candidate and renegotiation callbacks to the [`SessionSender`] in the
/// context, then returns the handle the role controller will drive.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self, ctx: SessionContext) -> Result<Arc<dyn PeerConnection>, SignalingError>;
}

/// Everything the engine needs to know about a freshly started session.
pub struct SessionContext {
    pub session_id: SessionId,
    pub remote_peer: PeerId,
    pub sender: SessionSender,
}

/// Outbound path of one session: relays locally produced SDP and ICE
/// payloads to the session peer.
#[derive(Clone)]
pub struct SessionSender {
    client: SignalingClient,
    session_id: SessionId,
}

impl SessionSender {
    pub(crate) fn new(client: SignalingClient, session_id: SessionId) -> Self {
        Self { client, session_id }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn send_sdp(&self, sdp: SdpMessage) -> Result<(), SignalingError> {
        self.client
            .send_peer_message(&self.session_id, PeerPayload::Sdp(sdp))
            .await
    }

    pub async fn send_ice(&self, candidate: IceCandidate) -> Result<(), SignalingError> {
        self.client
            .send_peer_message(&self.session_id, PeerPayload::Ice(candidate))
            .await
    }
}
