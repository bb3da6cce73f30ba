use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::RoleEvent;
use super::session::{NegotiationRole, Session, SessionStage};
use crate::client::{SignalingClient, SignalingEvent};
use crate::pc::{SessionContext, SessionFactory, SessionSender};
use crate::protocol::{PeerId, PeerPayload, SdpType, SessionId};

/// Owner of the session registry.
///
/// Runs as a single task consuming the client's event stream, so every
/// registry mutation and engine call happens on one serialized execution
/// context and events are handled strictly in arrival order.
pub(crate) struct SessionEngine {
    client: SignalingClient,
    factory: Arc<dyn SessionFactory>,
    negotiation: NegotiationRole,
    sessions: HashMap<SessionId, Session>,
    notify: async_channel::Sender<RoleEvent>,
    started: watch::Sender<Option<SessionId>>,
}

pub(crate) struct EngineHandles {
    /// Becomes true when the engine task has terminated.
    pub done: watch::Receiver<bool>,
    /// Most recently started session, for single-session waiters.
    pub started: watch::Receiver<Option<SessionId>>,
}

impl SessionEngine {
    pub(crate) fn spawn(
        client: SignalingClient,
        factory: Arc<dyn SessionFactory>,
        negotiation: NegotiationRole,
        notify: async_channel::Sender<RoleEvent>,
    ) -> EngineHandles {
        let (done_tx, done_rx) = watch::channel(false);
        let (started_tx, started_rx) = watch::channel(None);
        let events = client.events();

        let engine = SessionEngine {
            client,
            factory,
            negotiation,
            sessions: HashMap::new(),
            notify,
            started: started_tx,
        };

        tokio::spawn(async move {
            engine.run(events).await;
            let _ = done_tx.send(true);
        });

        EngineHandles {
            done: done_rx,
            started: started_rx,
        }
    }

    async fn run(mut self, events: async_channel::Receiver<SignalingEvent>) {
        while let Ok(event) = events.recv().await {
            self.handle(event).await;
        }

        // Connection gone: release whatever the server never ended.
        for (_, session) in self.sessions.drain() {
            session.pc.close().await;
        }
        debug!("Session engine terminated");
    }

    async fn handle(&mut self, event: SignalingEvent) {
        match event {
            SignalingEvent::StartSession {
                peer_id,
                session_id,
            }
            | SignalingEvent::SessionStarted {
                peer_id,
                session_id,
            } => {
                self.setup_session(session_id, peer_id).await;
            }
            SignalingEvent::Peer {
                session_id,
                payload,
            } => {
                self.peer_for_session(session_id, payload).await;
            }
            SignalingEvent::EndSession { session_id } => {
                self.close_session(session_id).await;
            }
            SignalingEvent::Error { details } => {
                let _ = self.notify.send(RoleEvent::ServerError { details }).await;
            }
            SignalingEvent::Welcome { .. }
            | SignalingEvent::PeerStatusChanged { .. }
            | SignalingEvent::ProducerList { .. } => {}
        }
    }

    async fn setup_session(&mut self, session_id: SessionId, remote_peer: PeerId) {
        if self.sessions.contains_key(&session_id) {
            warn!(
                "Protocol error: duplicate start for session {}, dropping",
                session_id
            );
            return;
        }
        info!("Session {} starting with peer {}", session_id, remote_peer);

        let ctx = SessionContext {
            session_id: session_id.clone(),
            remote_peer: remote_peer.clone(),
            sender: SessionSender::new(self.client.clone(), session_id.clone()),
        };
        let pc = match self.factory.create(ctx).await {
            Ok(pc) => pc,
            Err(e) => {
                warn!("Session setup failed for {}: {}", session_id, e);
                return;
            }
        };

        let mut session = Session {
            remote_peer: remote_peer.clone(),
            negotiation: self.negotiation,
            stage: SessionStage::Created,
            pc,
        };

        if session.negotiation == NegotiationRole::Offerer {
            match session.pc.create_offer().await {
                Ok(offer) => {
                    info!("Sending offer for session {}", session_id);
                    match self
                        .client
                        .send_peer_message(&session_id, PeerPayload::Sdp(offer))
                        .await
                    {
                        Ok(()) => session.stage = SessionStage::OfferSent,
                        Err(e) => warn!("Failed to send offer for {}: {}", session_id, e),
                    }
                }
                Err(e) => warn!("Offer creation failed for {}: {}", session_id, e),
            }
        }

        self.sessions.insert(session_id.clone(), session);
        self.started.send_replace(Some(session_id.clone()));
        let _ = self
            .notify
            .send(RoleEvent::NewSession {
                session_id,
                remote_peer,
            })
            .await;
    }

    async fn peer_for_session(&mut self, session_id: SessionId, payload: PeerPayload) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            warn!(
                "Protocol error: peer message for unknown or closed session {}, dropping",
                session_id
            );
            return;
        };

        match payload {
            PeerPayload::Sdp(sdp) => match (sdp.kind, session.negotiation) {
                (SdpType::Offer, NegotiationRole::Answerer) => {
                    if !matches!(session.stage, SessionStage::Created | SessionStage::Open) {
                        warn!(
                            "Unexpected offer for session {} in stage {:?}, dropping",
                            session_id, session.stage
                        );
                        return;
                    }
                    info!("Received offer for session {}", session_id);
                    match session.pc.create_answer(&sdp).await {
                        Ok(answer) => {
                            session.stage = SessionStage::OfferReceived;
                            info!("Sending answer for session {}", session_id);
                            match self
                                .client
                                .send_peer_message(&session_id, PeerPayload::Sdp(answer))
                                .await
                            {
                                Ok(()) => session.stage = SessionStage::Open,
                                Err(e) => {
                                    warn!("Failed to send answer for {}: {}", session_id, e);
                                }
                            }
                        }
                        Err(e) => warn!("Answer creation failed for {}: {}", session_id, e),
                    }
                }
                (SdpType::Answer, NegotiationRole::Offerer) => {
                    if session.stage != SessionStage::OfferSent {
                        warn!(
                            "Unexpected answer for session {} in stage {:?}, dropping",
                            session_id, session.stage
                        );
                        return;
                    }
                    info!("Received answer for session {}", session_id);
                    match session.pc.set_remote_description(&sdp).await {
                        Ok(()) => session.stage = SessionStage::Open,
                        Err(e) => warn!("Failed to apply answer for {}: {}", session_id, e),
                    }
                }
                (kind, negotiation) => {
                    warn!(
                        "Unexpected {:?} sdp for session {} as {:?}, dropping",
                        kind, session_id, negotiation
                    );
                }
            },
            PeerPayload::Ice(candidate) => {
                if candidate.candidate.is_empty() {
                    debug!("Empty candidate for session {}, ignoring", session_id);
                    return;
                }
                if let Err(e) = session.pc.add_ice_candidate(&candidate).await {
                    warn!("Failed to add candidate for {}: {}", session_id, e);
                }
            }
        }
    }

    async fn close_session(&mut self, session_id: SessionId) {
        let Some(mut session) = self.sessions.remove(&session_id) else {
            warn!(
                "Protocol error: end for unknown session {}, dropping",
                session_id
            );
            return;
        };
        info!("Session {} ended", session_id);

        session.stage = SessionStage::Closed;
        session.pc.close().await;
        let _ = self
            .notify
            .send(RoleEvent::SessionClosed {
                session_id,
                remote_peer: session.remote_peer,
            })
            .await;
    }
}
