use tokio::sync::watch;

use super::{RoleEvent, wait_done};
use crate::client::{SignalingClient, SignalingEvent};
use crate::error::SignalingError;
use crate::protocol::{PeerId, PeerRole};

/// Listener role: registers for peer-status notifications and re-emits
/// them. Never takes part in sessions.
pub struct Listener {
    client: SignalingClient,
    name: String,
    events: async_channel::Receiver<RoleEvent>,
    done: watch::Receiver<bool>,
}

impl Listener {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        let client = SignalingClient::new(url);
        let (notify_tx, notify_rx) = async_channel::unbounded();
        let (done_tx, done_rx) = watch::channel(false);
        let events = client.events();

        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let forwarded = match event {
                    SignalingEvent::PeerStatusChanged {
                        peer_id,
                        roles,
                        meta,
                    } => RoleEvent::PeerStatusChanged {
                        peer_id,
                        roles,
                        meta,
                    },
                    SignalingEvent::Error { details } => RoleEvent::ServerError { details },
                    _ => continue,
                };
                let _ = notify_tx.send(forwarded).await;
            }
            let _ = done_tx.send(true);
        });

        Self {
            client,
            name: name.into(),
            events: notify_rx,
            done: done_rx,
        }
    }

    /// Connects, waits for the welcome, then registers as a listener.
    pub async fn connect(&self) -> Result<(), SignalingError> {
        self.client.connect().await?;
        self.client.wait_welcome().await?;
        self.client
            .set_peer_status(&[PeerRole::Listener], &self.name)
            .await
    }

    /// Connects and forwards notifications until the connection terminates.
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
