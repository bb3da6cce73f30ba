use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::error;

use crate::channel::{Dispatcher, Transport};
use crate::error::SignalingError;
use crate::protocol::{
    ClientMessage, PeerId, PeerMeta, PeerPayload, PeerRole, ServerMessage, SessionId,
};

/// Typed signalling events, emitted in wire arrival order.
///
/// One event per row of the server-to-peer protocol; `list` replies are
/// decoded into a producer-id map before emission.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    Welcome {
        peer_id: PeerId,
    },
    PeerStatusChanged {
        peer_id: PeerId,
        roles: Vec<PeerRole>,
        meta: PeerMeta,
    },
    StartSession {
        peer_id: PeerId,
        session_id: SessionId,
    },
    SessionStarted {
        peer_id: PeerId,
        session_id: SessionId,
    },
    EndSession {
        session_id: SessionId,
    },
    Peer {
        session_id: SessionId,
        payload: PeerPayload,
    },
    ProducerList {
        producers: HashMap<PeerId, PeerMeta>,
    },
    Error {
        details: String,
    },
}

enum Conn {
    Idle(Arc<EventDispatcher>),
    Connected(Transport),
    Closed,
}

struct Inner {
    url: String,
    conn: Mutex<Conn>,
    peer_id: watch::Receiver<Option<PeerId>>,
    events: async_channel::Receiver<SignalingEvent>,
}

/// Signalling peer for the GStreamer WebRTC protocol.
///
/// Owns the WebSocket connection, decodes server messages into
/// [`SignalingEvent`]s and exposes the outbound protocol operations. Clones
/// share one connection. The event stream from [`events`](Self::events) must
/// be drained by exactly one consumer loop per client instance (a role
/// controller, an adapter, or an ad-hoc waiter).
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<Inner>,
}

impl SignalingClient {
    pub fn new(url: impl Into<String>) -> Self {
        let (peer_tx, peer_rx) = watch::channel(None);
        let (event_tx, event_rx) = async_channel::unbounded();
        let dispatcher = Arc::new(EventDispatcher {
            peer_id: peer_tx,
            events: event_tx,
        });

        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                conn: Mutex::new(Conn::Idle(dispatcher)),
                peer_id: peer_rx,
                events: event_rx,
            }),
        }
    }

    /// Connects to the signalling server and starts the receive loop.
    ///
    /// Does not wait for the welcome message; see [`wait_welcome`](Self::wait_welcome).
    pub async fn connect(&self) -> Result<(), SignalingError> {
        let mut conn = self.inner.conn.lock().await;
        match std::mem::replace(&mut *conn, Conn::Closed) {
            Conn::Idle(dispatcher) => {
                match Transport::connect(&self.inner.url, dispatcher.clone()).await {
                    Ok(transport) => {
                        *conn = Conn::Connected(transport);
                        Ok(())
                    }
                    Err(e) => {
                        *conn = Conn::Idle(dispatcher);
                        Err(e)
                    }
                }
            }
            Conn::Connected(transport) => {
                *conn = Conn::Connected(transport);
                Err(SignalingError::Connection("already connected".to_owned()))
            }
            Conn::Closed => Err(SignalingError::Connection(
                "client already closed".to_owned(),
            )),
        }
    }

    /// Closes the connection: the receive loop is signalled and joined, then
    /// the socket is shut down. Fails with [`SignalingError::NotConnected`]
    /// when called without a live connection, including a second close.
    pub async fn close(&self) -> Result<(), SignalingError> {
        let transport = {
            let mut conn = self.inner.conn.lock().await;
            match std::mem::replace(&mut *conn, Conn::Closed) {
                Conn::Connected(transport) => transport,
                Conn::Idle(dispatcher) => {
                    *conn = Conn::Idle(dispatcher);
                    return Err(SignalingError::NotConnected);
                }
                Conn::Closed => return Err(SignalingError::NotConnected),
            }
        };
        transport.close().await
    }

    /// The peer id assigned by the server, once the welcome arrived.
    pub fn peer_id(&self) -> Option<PeerId> {
        self.inner.peer_id.borrow().clone()
    }

    /// Waits until the server's welcome assigns this peer its id.
    ///
    /// Fails if the connection terminates first. The core imposes no
    /// timeout; wrap in `tokio::time::timeout` to bound the wait.
    pub async fn wait_welcome(&self) -> Result<PeerId, SignalingError> {
        let mut rx = self.inner.peer_id.clone();
        let assigned = rx
            .wait_for(|id| id.is_some())
            .await
            .map_err(|_| SignalingError::Connection("connection closed before welcome".to_owned()))?
            .clone();
        assigned.ok_or_else(|| SignalingError::Internal("welcome watch emptied".to_owned()))
    }

    /// Subscribes to the typed event stream.
    ///
    /// The stream is a queue, not a broadcast: each event is delivered to
    /// one receiver. Use a single consumer loop per client.
    pub fn events(&self) -> async_channel::Receiver<SignalingEvent> {
        self.inner.events.clone()
    }

    /// Announces this peer's roles and name.
    ///
    /// Fails with [`SignalingError::Precondition`] before the welcome.
    pub async fn set_peer_status(
        &self,
        roles: &[PeerRole],
        name: &str,
    ) -> Result<(), SignalingError> {
        let peer_id = self.require_peer_id()?;
        self.send(&ClientMessage::SetPeerStatus {
            peer_id,
            roles: roles.to_vec(),
            meta: PeerMeta {
                name: name.to_owned(),
            },
        })
        .await
    }

    /// Requests a session with a producer peer.
    ///
    /// Fails with [`SignalingError::Precondition`] before the welcome.
    pub async fn start_session(&self, peer_id: &PeerId) -> Result<(), SignalingError> {
        self.require_peer_id()?;
        self.send(&ClientMessage::StartSession {
            peer_id: peer_id.clone(),
        })
        .await
    }

    /// Ends an existing session.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<(), SignalingError> {
        self.send(&ClientMessage::EndSession {
            session_id: session_id.clone(),
        })
        .await
    }

    /// Sends an SDP/ICE payload to the peer of a session.
    pub async fn send_peer_message(
        &self,
        session_id: &SessionId,
        payload: PeerPayload,
    ) -> Result<(), SignalingError> {
        self.send(&ClientMessage::Peer {
            session_id: session_id.clone(),
            payload,
        })
        .await
    }

    /// Requests the current list of producers; the reply arrives as a
    /// [`SignalingEvent::ProducerList`].
    pub async fn request_list(&self) -> Result<(), SignalingError> {
        self.send(&ClientMessage::List).await
    }

    fn require_peer_id(&self) -> Result<PeerId, SignalingError> {
        self.peer_id()
            .ok_or(SignalingError::Precondition("peer id not yet received"))
    }

    async fn send(&self, message: &ClientMessage) -> Result<(), SignalingError> {
        let conn = self.inner.conn.lock().await;
        match &*conn {
            Conn::Connected(transport) => transport.send(message),
            _ => Err(SignalingError::NotConnected),
        }
    }
}

/// Bridges the transport's receive loop to client state and subscribers.
/// Held only by the receive task once connected, so a terminating loop
/// drops it and closes both the peer-id watch and the event stream.
struct EventDispatcher {
    peer_id: watch::Sender<Option<PeerId>>,
    events: async_channel::Sender<SignalingEvent>,
}

#[async_trait::async_trait]
impl Dispatcher for EventDispatcher {
    async fn dispatch(&self, message: ServerMessage) {
        let event = match message {
            ServerMessage::Welcome { peer_id } => {
                self.peer_id.send_replace(Some(peer_id.clone()));
                SignalingEvent::Welcome { peer_id }
            }
            ServerMessage::PeerStatusChanged {
                peer_id,
                roles,
                meta,
            } => SignalingEvent::PeerStatusChanged {
                peer_id,
                roles,
                meta,
            },
            ServerMessage::StartSession {
                peer_id,
                session_id,
            } => SignalingEvent::StartSession {
                peer_id,
                session_id,
            },
            ServerMessage::SessionStarted {
                peer_id,
                session_id,
            } => SignalingEvent::SessionStarted {
                peer_id,
                session_id,
            },
            ServerMessage::EndSession { session_id } => SignalingEvent::EndSession { session_id },
            ServerMessage::Peer {
                session_id,
                payload,
            } => SignalingEvent::Peer {
                session_id,
                payload,
            },
            ServerMessage::List { producers } => SignalingEvent::ProducerList {
                producers: producers.into_iter().map(|p| (p.id, p.meta)).collect(),
            },
            ServerMessage::Error { details } => {
                error!("Server reported an error: \"{}\"", details);
                SignalingEvent::Error { details }
            }
        };

        // Send fails only when every subscriber is gone; the event is
        // dropped, matching an event with no registered handler.
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bind_server, connect_pair, recv_json, send_text};
    use serde_json::json;

    #[tokio::test]
    async fn welcome_sets_peer_id_and_status_uses_it() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let mut server = connect_pair(&client, &listener).await;

        send_text(&mut server, r#"{"type": "welcome", "peerId": "p1"}"#).await;
        let peer_id = client.wait_welcome().await.unwrap();
        assert_eq!(peer_id.as_str(), "p1");

        client
            .set_peer_status(&[PeerRole::Producer], "cam1")
            .await
            .unwrap();
        assert_eq!(
            recv_json(&mut server).await,
            json!({
                "type": "setPeerStatus",
                "peerId": "p1",
                "roles": ["producer"],
                "meta": {"name": "cam1"},
            })
        );

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn start_session_before_welcome_fails_without_sending() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let mut server = connect_pair(&client, &listener).await;

        let err = client
            .start_session(&PeerId::from("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::Precondition(_)));

        // Nothing was sent: the next frame the server sees is the list
        // request issued afterwards.
        client.request_list().await.unwrap();
        assert_eq!(recv_json(&mut server).await, json!({"type": "list"}));

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn list_reply_becomes_producer_map() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let events = client.events();
        let mut server = connect_pair(&client, &listener).await;

        client.request_list().await.unwrap();
        assert_eq!(recv_json(&mut server).await, json!({"type": "list"}));
        send_text(
            &mut server,
            r#"{"type": "list", "producers": [{"id": "p1", "meta": {"name": "cam1"}}]}"#,
        )
        .await;

        loop {
            match events.recv().await.unwrap() {
                SignalingEvent::ProducerList { producers } => {
                    assert_eq!(producers.len(), 1);
                    assert_eq!(producers[&PeerId::from("p1")].name, "cam1");
                    break;
                }
                _ => continue,
            }
        }

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn second_close_fails_with_not_connected() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let _server = connect_pair(&client, &listener).await;

        client.close().await.unwrap();
        let err = client.close().await.unwrap_err();
        assert!(matches!(err, SignalingError::NotConnected));
    }

    #[tokio::test]
    async fn send_after_close_fails_immediately() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let _server = connect_pair(&client, &listener).await;

        client.close().await.unwrap();
        let err = client.request_list().await.unwrap_err();
        assert!(matches!(err, SignalingError::NotConnected));
    }

    #[tokio::test]
    async fn unknown_message_type_is_ignored() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let mut server = connect_pair(&client, &listener).await;

        send_text(&mut server, r#"{"type": "totallyNew", "x": 1}"#).await;
        send_text(&mut server, r#"{"type": "welcome", "peerId": "p2"}"#).await;

        // The unknown frame is skipped; the welcome after it still lands.
        assert_eq!(client.wait_welcome().await.unwrap().as_str(), "p2");

        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn non_json_frame_terminates_receive_loop() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let events = client.events();
        let mut server = connect_pair(&client, &listener).await;

        send_text(&mut server, "this is not json").await;

        // Loop death closes the event stream and fails pending waiters.
        assert!(events.recv().await.is_err());
        let err = client.wait_welcome().await.unwrap_err();
        assert!(matches!(err, SignalingError::Connection(_)));
    }

    #[tokio::test]
    async fn welcome_then_events_in_arrival_order() {
        let (url, listener) = bind_server().await;
        let client = SignalingClient::new(url);
        let events = client.events();
        let mut server = connect_pair(&client, &listener).await;

        send_text(&mut server, r#"{"type": "welcome", "peerId": "p1"}"#).await;
        send_text(
            &mut server,
            r#"{"type": "startSession", "peerId": "c1", "sessionId": "s1"}"#,
        )
        .await;
        send_text(&mut server, r#"{"type": "endSession", "sessionId": "s1"}"#).await;

        assert!(matches!(
            events.recv().await.unwrap(),
            SignalingEvent::Welcome { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SignalingEvent::StartSession { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            SignalingEvent::EndSession { .. }
        ));

        client.close().await.unwrap();
    }
}
