use std::sync::Arc;

use crate::pc::PeerConnection;
use crate::protocol::PeerId;

/// Which side of the offer/answer exchange this peer drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Sends the offer, expects an answer (producer side).
    Offerer,
    /// Waits for the offer, sends the answer (consumer side).
    Answerer,
}

/// Negotiation progress of one session.
///
/// `Created → (OfferSent | OfferReceived) → Open → Closed`; there is no
/// transition out of `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    Created,
    OfferSent,
    OfferReceived,
    Open,
    Closed,
}

/// One entry of the session registry.
pub(crate) struct Session {
    pub remote_peer: PeerId,
    pub negotiation: NegotiationRole,
    pub stage: SessionStage,
    pub pc: Arc<dyn PeerConnection>,
}
