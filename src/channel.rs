use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::error::SignalingError;
use crate::protocol::{self, ClientMessage, DecodeError, ServerMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives decoded server envelopes from the transport's receive loop.
///
/// Each envelope is dispatched to completion before the next frame is read,
/// so implementations see events strictly in wire arrival order.
#[async_trait::async_trait]
pub(crate) trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, message: ServerMessage);
}

/// One WebSocket connection to the signalling server: a send task draining
/// an outbound queue and a receive loop feeding the dispatcher.
pub(crate) struct Transport {
    out_tx: mpsc::UnboundedSender<Message>,
    shutdown_tx: oneshot::Sender<()>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

impl Transport {
    pub(crate) async fn connect(
        url: &str,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, SignalingError> {
        info!("Connecting to {}", url);
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected.");

        let (ws_tx, ws_rx) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let send_task = tokio::spawn(send_loop(ws_tx, out_rx));
        let recv_task = tokio::spawn(recv_loop(ws_rx, dispatcher, shutdown_rx));

        Ok(Self {
            out_tx,
            shutdown_tx,
            recv_task,
            send_task,
        })
    }

    /// Serializes a message and queues it for the send task.
    pub(crate) fn send(&self, message: &ClientMessage) -> Result<(), SignalingError> {
        let text = serde_json::to_string(message)
            .map_err(|e| SignalingError::Internal(format!("message serialization: {e}")))?;
        debug!("Sending message: {}", text);
        self.out_tx
            .send(Message::Text(text.into()))
            .map_err(|_| SignalingError::NotConnected)
    }

    /// Signals the receive loop to stop, waits for it, then lets the send
    /// task emit a Close frame and drain. Cancellation is cooperative; the
    /// tasks are joined, never aborted.
    pub(crate) async fn close(self) -> Result<(), SignalingError> {
        info!("Closing connection.");
        let Self {
            out_tx,
            shutdown_tx,
            recv_task,
            send_task,
        } = self;

        let _ = shutdown_tx.send(());
        let _ = recv_task.await;
        drop(out_tx);
        let _ = send_task.await;

        debug!("Closed.");
        Ok(())
    }
}

async fn send_loop(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        if ws_tx.send(msg).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    debug!("Send loop terminated");
}

async fn recv_loop(
    mut ws_rx: SplitStream<WsStream>,
    dispatcher: Arc<dyn Dispatcher>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    info!("Starting input message handler.");

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Input message handler cancelled.");
                break;
            }

            frame = ws_rx.next() => {
                let msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Connection closed by server");
                        break;
                    }
                };

                match msg {
                    Message::Text(text) => {
                        debug!("Received message: {}", text);
                        if !handle_frame(text.as_str(), dispatcher.as_ref()).await {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("Close received from server");
                        break;
                    }
                    // Ping/Pong are answered by tungstenite itself.
                    _ => {}
                }
            }
        }
    }
    // Dropping the dispatcher here closes the event stream and wakes any
    // waiter still blocked on a welcome or session start.
}

/// Decodes and dispatches one text frame. Returns false if the frame is so
/// malformed that the loop must terminate.
async fn handle_frame(text: &str, dispatcher: &dyn Dispatcher) -> bool {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            error!("Frame is not valid JSON, terminating receive loop: {}", e);
            return false;
        }
    };

    match protocol::decode(value) {
        Ok(message) => dispatcher.dispatch(message).await,
        Err(DecodeError::UnknownType(ty)) => {
            warn!("Received unknown message type: {}", ty);
        }
        Err(e) => {
            warn!("Dropping malformed message: {}", e);
        }
    }
    true
}
