//! Role controllers layered on the signalling client: producer, consumer
//! and listener, sharing one session-lifecycle engine.

mod consumer;
mod engine;
mod listener;
mod producer;
mod session;

pub use consumer::Consumer;
pub use listener::Listener;
pub use producer::Producer;
pub use session::{NegotiationRole, SessionStage};

use tokio::sync::watch;

use crate::error::SignalingError;
use crate::protocol::{PeerId, PeerMeta, PeerRole, SessionId};

/// Notifications a role controller emits to its own subscribers.
#[derive(Debug, Clone)]
pub enum RoleEvent {
    /// A session was created and its peer connection set up.
    NewSession {
        session_id: SessionId,
        remote_peer: PeerId,
    },

    /// A session ended and its peer connection was released.
    SessionClosed {
        session_id: SessionId,
        remote_peer: PeerId,
    },

    /// A peer announced or changed its status (listener role only).
    PeerStatusChanged {
        peer_id: PeerId,
        roles: Vec<PeerRole>,
        meta: PeerMeta,
    },

    /// The server reported an error; the connection stays up and closing
    /// is left to the caller.
    ServerError { details: String },
}

/// Blocks until a role's background task has terminated.
pub(crate) async fn wait_done(mut done: watch::Receiver<bool>) -> Result<(), SignalingError> {
    done.wait_for(|finished| *finished)
        .await
        .map_err(|_| SignalingError::Internal("role task dropped".to_owned()))?;
    Ok(())
}
