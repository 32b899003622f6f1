//! Transport seam for the signaling channel
//!
//! The channel logic only sees text frames going out and [`TransportEvent`]s
//! coming in; the WebSocket plumbing lives behind [`Connector`] so tests can
//! swap in channel-backed fakes.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SignalingError;

const FRAME_BUFFER: usize = 64;

/// Inbound side of an established transport connection
#[derive(Debug)]
pub enum TransportEvent {
    /// A complete text frame
    Frame(String),
    /// The connection dropped (remote close or transport error)
    Closed,
}

/// One established, ordered, duplex connection to the relay
pub struct TransportPair {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Dials the signaling relay
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<TransportPair, SignalingError>> + Send;
}

/// WebSocket connector used in production
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<TransportPair, SignalingError> {
        let (ws, _resp) = connect_async(url)
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(FRAME_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(FRAME_BUFFER);

        // Pump task: owns the socket halves for the lifetime of the connection.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                let _ = in_tx.send(TransportEvent::Closed).await;
                                break;
                            }
                        }
                        // Channel handle dropped this connection.
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = sink.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = in_tx.send(TransportEvent::Closed).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("websocket transport error: {e}");
                            let _ = in_tx.send(TransportEvent::Closed).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(TransportPair {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
