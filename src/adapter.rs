//! Single-session facade over the signalling client.
//!
//! For callers that drive one session with their own engine loop instead of
//! plugging a [`SessionFactory`](crate::pc::SessionFactory) into a role
//! controller: payloads arrive through a queue in wire order, and the
//! session's end shows up in-band as [`SessionItem::End`].

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, info, warn};

use crate::client::{SignalingClient, SignalingEvent};
use crate::error::SignalingError;
use crate::protocol::{PeerId, PeerPayload, PeerRole, SessionId};

/// Which side of the handshake the adapter performs on connect.
#[derive(Debug, Clone)]
pub enum AdapterRole {
    /// Register under `name` and wait for a consumer to start a session.
    Producer { name: String },
    /// Start a session against the given producer.
    Consumer { producer_peer_id: PeerId },
}

/// One item of the inbound session queue.
#[derive(Debug, Clone)]
pub enum SessionItem {
    Payload(PeerPayload),
    /// The session ended, or the server reported an error for it.
    End,
}

/// Queue-style access to a single signalling session.
pub struct SessionAdapter {
    client: SignalingClient,
    role: AdapterRole,
    session: watch::Receiver<Option<SessionId>>,
    items: Mutex<mpsc::UnboundedReceiver<SessionItem>>,
}

impl SessionAdapter {
    pub fn new(url: impl Into<String>, role: AdapterRole) -> Self {
        let client = SignalingClient::new(url);
        let (session_tx, session_rx) = watch::channel(None);
        let (item_tx, item_rx) = mpsc::unbounded_channel();

        let events = client.events();
        let accept_start = matches!(role, AdapterRole::Producer { .. });
        tokio::spawn(event_loop(events, session_tx, item_tx, accept_start));

        Self {
            client,
            role,
            session: session_rx,
            items: Mutex::new(item_rx),
        }
    }

    /// Connects and performs the role handshake; returns once both the peer
    /// id and the session id are known. Has to be called before any other
    /// method. Wrap in `tokio::time::timeout` to bound the wait.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        self.client.connect().await?;
        let peer_id = self.client.wait_welcome().await?;

        match &self.role {
            AdapterRole::Producer { name } => {
                self.client
                    .set_peer_status(&[PeerRole::Producer], name)
                    .await?;
            }
            AdapterRole::Consumer { producer_peer_id } => {
                self.client.start_session(producer_peer_id).await?;
            }
        }

        let session_id = self.wait_session().await?;
        info!(
            "Connected, peer_id: {}, session_id: {}",
            peer_id, session_id
        );
        Ok(())
    }

    /// The session this adapter is bound to, once started.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.borrow().clone()
    }

    /// Sends an SDP/ICE payload to the session peer.
    pub async fn send(&self, payload: PeerPayload) -> Result<(), SignalingError> {
        let session_id = self
            .session_id()
            .ok_or(SignalingError::Precondition("session not yet started"))?;
        self.client.send_peer_message(&session_id, payload).await
    }

    /// Receives the next inbound item, in wire arrival order.
    ///
    /// Returns `None` once the underlying connection is gone and the queue
    /// is drained.
    pub async fn recv(&self) -> Option<SessionItem> {
        self.items.lock().await.recv().await
    }

    pub async fn close(&self) -> Result<(), SignalingError> {
        self.client.close().await
    }

    async fn wait_session(&self) -> Result<SessionId, SignalingError> {
        let mut rx = self.session.clone();
        let started = rx
            .wait_for(|session| session.is_some())
            .await
            .map_err(|_| {
                SignalingError::Connection("connection closed before session start".to_owned())
            })?
            .clone();
        started.ok_or_else(|| SignalingError::Internal("session watch emptied".to_owned()))
    }
}

async fn event_loop(
    events: async_channel::Receiver<SignalingEvent>,
    session_tx: watch::Sender<Option<SessionId>>,
    item_tx: mpsc::UnboundedSender<SessionItem>,
    accept_start: bool,
) {
    while let Ok(event) = events.recv().await {
        match event {
            SignalingEvent::StartSession { session_id, .. } if accept_start => {
                session_tx.send_replace(Some(session_id));
            }
            SignalingEvent::SessionStarted { session_id, .. } if !accept_start => {
                session_tx.send_replace(Some(session_id));
            }
            SignalingEvent::Peer {
                session_id,
                payload,
            } => {
                let bound = session_tx.borrow().clone();
                if bound.as_ref() != Some(&session_id) {
                    warn!(
                        "Protocol error: peer message for session {} outside the bound session, dropping",
                        session_id
                    );
                    continue;
                }
                if let PeerPayload::Ice(candidate) = &payload {
                    if candidate.candidate.is_empty() {
                        debug!("Empty candidate, ignoring");
                        continue;
                    }
                }
                let _ = item_tx.send(SessionItem::Payload(payload));
            }
            SignalingEvent::EndSession { .. } => {
                let _ = item_tx.send(SessionItem::End);
            }
            SignalingEvent::Error { details } => {
                warn!("Session failed with server error: \"{}\"", details);
                let _ = item_tx.send(SessionItem::End);
            }
            _ => {}
        }
    }
    // item_tx drops here; a drained queue then yields None.
}
