use std::sync::Arc;

use tokio::sync::watch;

use super::engine::SessionEngine;
use super::session::NegotiationRole;
use super::{RoleEvent, wait_done};
use crate::client::SignalingClient;
use crate::error::SignalingError;
use crate::pc::SessionFactory;
use crate::protocol::{PeerId, PeerRole};

/// Producer role: announces itself by name, then acts as the offerer for
/// every session a consumer starts against it.
pub struct Producer {
    client: SignalingClient,
    name: String,
    events: async_channel::Receiver<RoleEvent>,
    done: watch::Receiver<bool>,
}

impl Producer {
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let client = SignalingClient::new(url);
        let (notify_tx, notify_rx) = async_channel::unbounded();
        let handles = SessionEngine::spawn(
            client.clone(),
            factory,
            NegotiationRole::Offerer,
            notify_tx,
        );

        Self {
            client,
            name: name.into(),
            events: notify_rx,
            done: handles.done,
        }
    }

    /// Connects, waits for the welcome, then registers as a producer.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        self.client.connect().await?;
        self.client.wait_welcome().await?;
        self.client
            .set_peer_status(&[PeerRole::Producer], &self.name)
            .await
    }

    /// Connects and serves sessions until the connection terminates.
    pub async fn serve(&self) -> Result<(), SignalingError> {
        self.connect().await?;
        wait_done(self.done.clone()).await
    }

    pub fn events(&self) -> async_channel::Receiver<RoleEvent> {
        self.events.clone()
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.client.peer_id()
    }

    pub async fn close(&self) -> Result<(), SignalingError> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, accept, bind_server, recv_json, send_text};
    use serde_json::json;

    #[tokio::test]
    async fn producer_registers_and_offers_on_start_session() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let producer = Producer::new(url, "cam1", factory.clone());

        let mut server = accept_and_welcome(&listener, &producer, "p1").await;
        assert_eq!(producer.peer_id().unwrap().as_str(), "p1");

        // A consumer asked the server for a session with us.
        send_text(
            &mut server,
            r#"{"type": "startSession", "peerId": "c1", "sessionId": "s1"}"#,
        )
        .await;

        // The engine invokes the setup hook exactly once and sends the offer.
        let offer = recv_json(&mut server).await;
        assert_eq!(offer["type"], "peer");
        assert_eq!(offer["sessionId"], "s1");
        assert_eq!(offer["sdp"]["type"], "offer");
        assert_eq!(factory.created(), 1);

        match producer.events().recv().await.unwrap() {
            RoleEvent::NewSession {
                session_id,
                remote_peer,
            } => {
                assert_eq!(session_id.as_str(), "s1");
                assert_eq!(remote_peer.as_str(), "c1");
            }
            other => panic!("Expected NewSession, got {:?}", other),
        }

        // Counterpart answers; the engine applies it to the connection.
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "sdp": {"type": "answer", "sdp": "v=0 answer"}}"#,
        )
        .await;
        send_text(&mut server, r#"{"type": "endSession", "sessionId": "s1"}"#).await;

        match producer.events().recv().await.unwrap() {
            RoleEvent::SessionClosed { session_id, .. } => {
                assert_eq!(session_id.as_str(), "s1");
            }
            other => panic!("Expected SessionClosed, got {:?}", other),
        }

        let pc = factory.connection(0);
        assert!(pc.calls().contains(&"create_offer".to_owned()));
        assert!(
            pc.calls()
                .contains(&"set_remote_description answer".to_owned())
        );
        assert!(pc.closed());

        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn wrong_direction_sdp_is_dropped_not_fatal() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let producer = Producer::new(url, "cam1", factory.clone());

        let mut server = accept_and_welcome(&listener, &producer, "p1").await;
        send_text(
            &mut server,
            r#"{"type": "startSession", "peerId": "c1", "sessionId": "s1"}"#,
        )
        .await;
        let _offer = recv_json(&mut server).await;

        // An offer to the offerer is unexpected and must be ignored.
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "sdp": {"type": "offer", "sdp": "bogus"}}"#,
        )
        .await;
        // A valid answer afterwards is still processed.
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "sdp": {"type": "answer", "sdp": "v=0 answer"}}"#,
        )
        .await;
        send_text(&mut server, r#"{"type": "endSession", "sessionId": "s1"}"#).await;

        loop {
            match producer.events().recv().await.unwrap() {
                RoleEvent::SessionClosed { .. } => break,
                _ => continue,
            }
        }

        let pc = factory.connection(0);
        assert!(!pc.calls().iter().any(|c| c.starts_with("create_answer")));
        assert!(
            pc.calls()
                .contains(&"set_remote_description answer".to_owned())
        );

        producer.close().await.unwrap();
    }

    #[tokio::test]
    async fn session_sender_relays_locally_gathered_candidates() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let producer = Producer::new(url, "cam1", factory.clone());

        let mut server = accept_and_welcome(&listener, &producer, "p1").await;
        send_text(
            &mut server,
            r#"{"type": "startSession", "peerId": "c1", "sessionId": "s1"}"#,
        )
        .await;
        let _offer = recv_json(&mut server).await;

        // The engine pushes a candidate it gathered through the sender the
        // setup hook received.
        let sender = factory.sender(0);
        assert_eq!(sender.session_id().as_str(), "s1");
        sender
            .send_ice(crate::protocol::IceCandidate {
                candidate: "candidate:9 1 UDP 2122".to_owned(),
                sdp_mline_index: 1,
            })
            .await
            .unwrap();

        assert_eq!(
            recv_json(&mut server).await,
            json!({
                "type": "peer",
                "sessionId": "s1",
                "ice": {"candidate": "candidate:9 1 UDP 2122", "sdpMLineIndex": 1},
            })
        );

        producer.close().await.unwrap();
    }

    async fn accept_and_welcome(
        listener: &tokio::net::TcpListener,
        producer: &Producer,
        peer_id: &str,
    ) -> crate::testing::ServerWs {
        let connect = producer.connect();
        let accepted = async {
            let mut server = accept(listener).await;
            send_text(
                &mut server,
                &format!(r#"{{"type": "welcome", "peerId": "{peer_id}"}}"#),
            )
            .await;
            // connect() registers the producer once welcomed
            let status = recv_json(&mut server).await;
            assert_eq!(
                status,
                json!({
                    "type": "setPeerStatus",
                    "peerId": peer_id,
                    "roles": ["producer"],
                    "meta": {"name": "cam1"},
                })
            );
            server
        };
        let (connected, server) = tokio::join!(connect, accepted);
        connected.unwrap();
        server
    }
}
