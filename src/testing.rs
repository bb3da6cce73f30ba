//! Shared helpers for integration-style tests: the server end of a
//! signalling conversation and a recording peer-connection engine.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::client::SignalingClient;
use crate::error::SignalingError;
use crate::pc::{EngineError, PeerConnection, SessionContext, SessionFactory, SessionSender};
use crate::protocol::{IceCandidate, SdpMessage, SdpType};

pub(crate) type ServerWs = WebSocketStream<TcpStream>;

/// Binds a listener on a free local port and returns its ws:// URL.
pub(crate) async fn bind_server() -> (String, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (url, listener)
}

/// Accepts one client connection and completes the WebSocket handshake.
pub(crate) async fn accept(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Connects the client while accepting it server-side; the two handshake
/// halves have to run concurrently.
pub(crate) async fn connect_pair(client: &SignalingClient, listener: &TcpListener) -> ServerWs {
    let (connected, server) = tokio::join!(client.connect(), accept(listener));
    connected.unwrap();
    server
}

/// Sends one text frame to the client.
pub(crate) async fn send_text(ws: &mut ServerWs, text: &str) {
    ws.send(Message::Text(text.into())).await.unwrap();
}

/// Reads the next text frame from the client and parses it as JSON.
pub(crate) async fn recv_json(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        match ws.next().await.expect("client closed the connection") {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).unwrap(),
            Ok(_) => continue,
            Err(e) => panic!("websocket error: {e}"),
        }
    }
}

/// Peer connection double that records every call made against it.
pub(crate) struct MockConnection {
    calls: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl MockConnection {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    async fn create_offer(&self) -> Result<SdpMessage, EngineError> {
        self.record("create_offer".to_owned());
        Ok(SdpMessage {
            kind: SdpType::Offer,
            sdp: "v=0 mock offer".to_owned(),
        })
    }

    async fn create_answer(&self, remote_offer: &SdpMessage) -> Result<SdpMessage, EngineError> {
        self.record(format!("create_answer {}", kind_str(remote_offer.kind)));
        Ok(SdpMessage {
            kind: SdpType::Answer,
            sdp: "v=0 mock answer".to_owned(),
        })
    }

    async fn set_remote_description(&self, sdp: &SdpMessage) -> Result<(), EngineError> {
        self.record(format!("set_remote_description {}", kind_str(sdp.kind)));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError> {
        self.record(format!("add_ice_candidate {}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn kind_str(kind: SdpType) -> &'static str {
    match kind {
        SdpType::Offer => "offer",
        SdpType::Answer => "answer",
    }
}

/// Session factory double: hands out [`MockConnection`]s and keeps the
/// session senders so tests can exercise the outbound path.
pub(crate) struct MockFactory {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    senders: Mutex<Vec<SessionSender>>,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Number of sessions set up through this factory.
    pub(crate) fn created(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub(crate) fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub(crate) fn sender(&self, index: usize) -> SessionSender {
        self.senders.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create(&self, ctx: SessionContext) -> Result<Arc<dyn PeerConnection>, SignalingError> {
        let pc = Arc::new(MockConnection::new());
        self.connections.lock().unwrap().push(pc.clone());
        self.senders.lock().unwrap().push(ctx.sender);
        Ok(pc)
    }
}
