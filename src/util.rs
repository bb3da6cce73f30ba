//! Producer discovery against a signalling server.

use std::collections::HashMap;

use crate::client::{SignalingClient, SignalingEvent};
use crate::error::SignalingError;
use crate::protocol::{PeerId, PeerMeta};

/// Fetches the current producer list from the server at `url`.
///
/// Opens a one-shot connection, requests the list, and closes again once
/// the reply arrived.
pub async fn get_producer_list(url: &str) -> Result<HashMap<PeerId, PeerMeta>, SignalingError> {
    let client = SignalingClient::new(url);
    let events = client.events();

    client.connect().await?;
    client.request_list().await?;

    let producers = loop {
        match events.recv().await {
            Ok(SignalingEvent::ProducerList { producers }) => break producers,
            Ok(_) => continue,
            Err(_) => {
                return Err(SignalingError::Connection(
                    "connection closed before list reply".to_owned(),
                ));
            }
        }
    };

    client.close().await?;
    Ok(producers)
}

/// Resolves a producer's peer id by its advertised name.
///
/// If several producers share the name, an arbitrary one is returned. Fails
/// with [`SignalingError::ProducerNotFound`] when no producer matches.
pub async fn find_producer_peer_id_by_name(
    url: &str,
    name: &str,
) -> Result<PeerId, SignalingError> {
    let producers = get_producer_list(url).await?;

    for (peer_id, meta) in &producers {
        if meta.name == name {
            return Ok(peer_id.clone());
        }
    }

    Err(SignalingError::ProducerNotFound(name.to_owned()))
}
