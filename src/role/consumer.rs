use std::sync::Arc;

use tokio::sync::watch;

use super::engine::SessionEngine;
use super::session::NegotiationRole;
use super::{RoleEvent, wait_done};
use crate::client::SignalingClient;
use crate::error::SignalingError;
use crate::pc::SessionFactory;
use crate::protocol::{PeerId, SessionId};

/// Consumer role: starts a session against a known producer and answers
/// its offer.
pub struct Consumer {
    client: SignalingClient,
    producer_peer_id: PeerId,
    events: async_channel::Receiver<RoleEvent>,
    done: watch::Receiver<bool>,
    started: watch::Receiver<Option<SessionId>>,
}

impl Consumer {
    pub fn new(
        url: impl Into<String>,
        producer_peer_id: PeerId,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let client = SignalingClient::new(url);
        let (notify_tx, notify_rx) = async_channel::unbounded();
        let handles = SessionEngine::spawn(
            client.clone(),
            factory,
            NegotiationRole::Answerer,
            notify_tx,
        );

        Self {
            client,
            producer_peer_id,
            events: notify_rx,
            done: handles.done,
            started: handles.started,
        }
    }

    /// Connects, waits for the welcome, then requests a session with the
    /// configured producer.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        self.client.connect().await?;
        self.client.wait_welcome().await?;
        self.client.start_session(&self.producer_peer_id).await
    }

    /// Waits until the requested session has started and its peer
    /// connection is set up. Fails if the connection terminates first.
    pub async fn wait_session(&self) -> Result<SessionId, SignalingError> {
        let mut rx = self.started.clone();
        let started = rx
            .wait_for(|session| session.is_some())
            .await
            .map_err(|_| {
                SignalingError::Connection("connection closed before session start".to_owned())
            })?
            .clone();
        started.ok_or_else(|| SignalingError::Internal("session watch emptied".to_owned()))
    }

    /// Connects and runs until the connection terminates.
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

    /// Asks the server to end a session this consumer is part of.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<(), SignalingError> {
        self.client.end_session(session_id).await
    }

    pub async fn close(&self) -> Result<(), SignalingError> {
        self.client.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, ServerWs, accept, bind_server, recv_json, send_text};
    use serde_json::json;

    async fn connect_consumer(
        listener: &tokio::net::TcpListener,
        consumer: &Consumer,
    ) -> ServerWs {
        let connect = consumer.connect();
        let accepted = async {
            let mut server = accept(listener).await;
            send_text(&mut server, r#"{"type": "welcome", "peerId": "c1"}"#).await;
            assert_eq!(
                recv_json(&mut server).await,
                json!({"type": "startSession", "peerId": "p1"})
            );
            server
        };
        let (connected, server) = tokio::join!(connect, accepted);
        connected.unwrap();
        server
    }

    #[tokio::test]
    async fn session_started_invokes_setup_hook_once() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let consumer = Consumer::new(url, PeerId::from("p1"), factory.clone());

        let mut server = connect_consumer(&listener, &consumer).await;
        send_text(
            &mut server,
            r#"{"type": "sessionStarted", "peerId": "p1", "sessionId": "s1"}"#,
        )
        .await;

        let session_id = consumer.wait_session().await.unwrap();
        assert_eq!(session_id.as_str(), "s1");
        assert_eq!(factory.created(), 1);

        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn offer_is_answered() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let consumer = Consumer::new(url, PeerId::from("p1"), factory.clone());

        let mut server = connect_consumer(&listener, &consumer).await;
        send_text(
            &mut server,
            r#"{"type": "sessionStarted", "peerId": "p1", "sessionId": "s1"}"#,
        )
        .await;
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "sdp": {"type": "offer", "sdp": "v=0 offer"}}"#,
        )
        .await;

        let answer = recv_json(&mut server).await;
        assert_eq!(answer["type"], "peer");
        assert_eq!(answer["sessionId"], "s1");
        assert_eq!(answer["sdp"]["type"], "answer");

        let pc = factory.connection(0);
        assert!(pc.calls().contains(&"create_answer offer".to_owned()));

        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn peer_message_for_unknown_session_is_dropped() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let consumer = Consumer::new(url, PeerId::from("p1"), factory.clone());

        let mut server = connect_consumer(&listener, &consumer).await;

        // No session "ghost" exists; the message is dropped and the
        // connection survives.
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "ghost", "sdp": {"type": "offer", "sdp": "x"}}"#,
        )
        .await;
        // Subsequent valid traffic is still processed.
        send_text(
            &mut server,
            r#"{"type": "sessionStarted", "peerId": "p1", "sessionId": "s1"}"#,
        )
        .await;

        let session_id = consumer.wait_session().await.unwrap();
        assert_eq!(session_id.as_str(), "s1");
        assert_eq!(factory.created(), 1);

        consumer.close().await.unwrap();
    }

    #[tokio::test]
    async fn ice_candidates_reach_the_connection_after_end_session_they_do_not() {
        let (url, listener) = bind_server().await;
        let factory = Arc::new(MockFactory::new());
        let consumer = Consumer::new(url, PeerId::from("p1"), factory.clone());

        let mut server = connect_consumer(&listener, &consumer).await;
        send_text(
            &mut server,
            r#"{"type": "sessionStarted", "peerId": "p1", "sessionId": "s1"}"#,
        )
        .await;
        consumer.wait_session().await.unwrap();

        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "ice": {"candidate": "candidate:1", "sdpMLineIndex": 0}}"#,
        )
        .await;
        // Empty candidates are filtered.
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "ice": {"candidate": "", "sdpMLineIndex": 0}}"#,
        )
        .await;
        send_text(&mut server, r#"{"type": "endSession", "sessionId": "s1"}"#).await;

        loop {
            match consumer.events().recv().await.unwrap() {
                RoleEvent::SessionClosed { .. } => break,
                _ => continue,
            }
        }

        // Session is gone: further candidates are dropped, not delivered.
        send_text(
            &mut server,
            r#"{"type": "peer", "sessionId": "s1", "ice": {"candidate": "candidate:2", "sdpMLineIndex": 0}}"#,
        )
        .await;
        // Force ordering: a fresh session proves the loop is still alive.
        send_text(
            &mut server,
            r#"{"type": "sessionStarted", "peerId": "p1", "sessionId": "s2"}"#,
        )
        .await;
        loop {
            match consumer.events().recv().await.unwrap() {
                RoleEvent::NewSession { session_id, .. } if session_id.as_str() == "s2" => break,
                _ => continue,
            }
        }

        let pc = factory.connection(0);
        let candidate_calls: Vec<_> = pc
            .calls()
            .iter()
            .filter(|c| c.starts_with("add_ice_candidate"))
            .cloned()
            .collect();
        assert_eq!(candidate_calls, vec!["add_ice_candidate candidate:1"]);
        assert!(pc.closed());

        consumer.close().await.unwrap();
    }
}
