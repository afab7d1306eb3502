//! Thin WebSocket wrapper shared by the gateway-style backends.
//!
//! The read half stays with the owner (an event source); writes go through
//! a channel to a dedicated writer task, so heartbeats and ACKs can be sent
//! from anywhere without locking the sink.

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use abylebot_core::ConnectionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames queued for the writer task before senders start waiting.
const WRITE_QUEUE: usize = 32;

/// Cloneable handle for writing text frames.
#[derive(Clone, Debug)]
pub(crate) struct WsWriter {
    tx: mpsc::Sender<WsMessage>,
}

impl WsWriter {
    pub(crate) async fn send_text(&self, text: String) -> anyhow::Result<()> {
        self.tx
            .send(WsMessage::text(text))
            .await
            .map_err(|_| anyhow::anyhow!("websocket writer closed"))
    }

    async fn send_close(&self) {
        let _ = self.tx.send(WsMessage::Close(None)).await;
    }
}

pub(crate) struct WsConnection {
    read: SplitStream<WsStream>,
    writer: WsWriter,
    writer_task: JoinHandle<()>,
}

impl WsConnection {
    pub(crate) async fn connect(url: &str) -> Result<Self, ConnectionError> {
        debug!(url = %url, "opening websocket");
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ConnectionError::WebSocket(e.to_string()))?;

        let (mut sink, read) = stream.split();
        let (tx, mut rx) = mpsc::channel::<WsMessage>(WRITE_QUEUE);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let closing = matches!(frame, WsMessage::Close(_));
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "websocket write error");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        Ok(Self {
            read,
            writer: WsWriter { tx },
            writer_task,
        })
    }

    pub(crate) fn writer(&self) -> WsWriter {
        self.writer.clone()
    }

    /// Next text frame. `Ok(None)` once the peer closed the socket.
    pub(crate) async fn next_text(&mut self) -> anyhow::Result<Option<String>> {
        loop {
            match self.read.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(frame = ?frame, "websocket closed by peer");
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            }
        }
    }

    /// Send a close frame and wait for the writer to flush it.
    pub(crate) async fn close(&mut self) {
        self.writer.send_close().await;
        let deadline = std::time::Duration::from_secs(2);
        if tokio::time::timeout(deadline, &mut self.writer_task)
            .await
            .is_err()
        {
            self.writer_task.abort();
        }
    }
}
