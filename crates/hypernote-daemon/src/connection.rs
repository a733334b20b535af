//! Individual peer connection management.
//!
//! Each connection wraps a WebSocket stream split into a read task, which
//! forwards whole messages to the host's event channel, and a write task fed
//! by an unbounded queue. Works for both accepted (`TcpStream`) and dialed
//! (`MaybeTlsStream`) sockets.

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use hypernote_core::protocol::{self, Frame, RawFrame, MAX_MESSAGE_SIZE};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    tungstenite::{Error as WsError, Message},
    WebSocketStream,
};
use tracing::{debug, error, warn};

/// Whole message received from a peer, before frame decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl InboundMessage {
    pub fn len(&self) -> usize {
        match self {
            InboundMessage::Text(text) => text.len(),
            InboundMessage::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_raw(&self) -> RawFrame<'_> {
        match self {
            InboundMessage::Text(text) => RawFrame::Text(text),
            InboundMessage::Binary(bytes) => RawFrame::Binary(bytes),
        }
    }
}

/// Event emitted by a connection.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Received a message from the peer
    Message { conn_id: String, data: InboundMessage },
    /// Connection was closed (by either side, or on error)
    Closed { conn_id: String },
}

/// A single WebSocket connection to a peer.
pub struct PeerConnection {
    /// Connection ID assigned by the host (e.g., "conn-1")
    pub conn_id: String,
    outbound: mpsc::UnboundedSender<Message>,
    read_task: Option<JoinHandle<()>>,
}

impl PeerConnection {
    /// Take over a WebSocket stream. Spawns the read and write tasks.
    pub fn spawn<S>(
        conn_id: String,
        ws_stream: WebSocketStream<S>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (write, read) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, event_tx).await;
        });

        let write_conn_id = conn_id.clone();
        tokio::spawn(async move {
            Self::write_loop(write_conn_id, write, outbound_rx).await;
        });

        Self {
            conn_id,
            outbound,
            read_task: Some(read_task),
        }
    }

    /// Read loop that forwards messages to the event channel.
    async fn read_loop<S>(
        conn_id: String,
        mut read: futures::stream::SplitStream<WebSocketStream<S>>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Text(text) => InboundMessage::Text(text.to_string()),
                        Message::Binary(bytes) => InboundMessage::Binary(bytes.to_vec()),
                        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                    };

                    if data.len() > MAX_MESSAGE_SIZE {
                        warn!(
                            "Message from {} exceeds max size ({} > {}), dropping",
                            conn_id,
                            data.len(),
                            MAX_MESSAGE_SIZE
                        );
                        continue;
                    }

                    let _ = event_tx.send(ConnectionEvent::Message {
                        conn_id: conn_id.clone(),
                        data,
                    });
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed { conn_id });
    }

    /// Drains the outbound queue into the socket. Ends after sending a close
    /// frame or once every sender is gone.
    async fn write_loop<S>(
        conn_id: String,
        mut write: futures::stream::SplitSink<WebSocketStream<S>, Message>,
        mut outbound: mpsc::UnboundedReceiver<Message>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(msg) = outbound.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                debug!("Write to {} failed: {}", conn_id, e);
                return;
            }
            if closing {
                return;
            }
        }
        let _ = write.close().await;
    }

    /// Queue a frame for sending as a text message.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        let text = protocol::serialize(frame)?;
        self.send_text(text)
    }

    pub fn send_text(&self, text: String) -> Result<()> {
        self.outbound
            .send(Message::Text(text.into()))
            .map_err(|_| anyhow!("Connection {} is closed", self.conn_id))
    }

    /// Ask the peer to close. The read task keeps running until the peer
    /// acknowledges, then reports `Closed`.
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

impl Drop for PeerConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}
