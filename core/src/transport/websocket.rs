// WebSocket signaling channel
//
// One writer task drains an mpsc of outbound envelopes into the socket, one
// reader task turns inbound text frames into `TransportEvent`s. Either task
// ending means the connection is lost.

use super::TransportEvent;
use crate::message::{codec, ClientMessage};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use url::Url;

/// Endpoint path appended when the configured URL has none
pub const SIGNAL_PATH: &str = "/signal";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to connect to signaling server: {0}")]
    ConnectFailed(String),
}

/// Normalise a server URL: websocket scheme required, `/signal` used when
/// no path is given. Query and fragment are kept.
pub fn endpoint_url(base: &str) -> Result<String, TransportError> {
    let mut url =
        Url::parse(base.trim()).map_err(|e| TransportError::InvalidUrl(format!("{} ({})", base, e)))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::InvalidUrl(format!("{} (expected ws:// or wss://)", base)));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(TransportError::InvalidUrl(format!("{} (missing host)", base)));
    }

    if matches!(url.path(), "" | "/") {
        url.set_path(SIGNAL_PATH);
    }
    Ok(url.to_string())
}

/// Reader and writer tasks of one connection; aborted on drop
#[derive(Debug)]
pub struct ConnectionTasks {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ConnectionTasks {
    pub fn abort(&self) {
        self.writer.abort();
        self.reader.abort();
    }

    /// Wait for the writer to flush what is queued and close the socket.
    /// Only returns once every outbound sender is gone.
    pub async fn drain(&mut self) {
        let _ = (&mut self.writer).await;
    }
}

impl Drop for ConnectionTasks {
    fn drop(&mut self) {
        self.abort();
    }
}

/// An open signaling channel
#[derive(Debug)]
pub struct SignalConnection {
    /// Envelopes to send; dropping every sender closes the socket
    pub outbound: mpsc::UnboundedSender<ClientMessage>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    pub tasks: ConnectionTasks,
}

impl SignalConnection {
    /// Take over an established websocket
    pub fn from_stream<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let text = match codec::encode_client(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {}: {}", msg.kind(), e);
                        continue;
                    }
                };
                debug!("Sending message: {}", text);
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("Websocket send failed: {}", e);
                    return;
                }
            }
            debug!("Outbound channel closed; closing websocket");
            let _ = sink.send(Message::Close(None)).await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(TransportEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Binary(data)) => {
                        warn!("Ignoring {} byte binary frame", data.len());
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        info!("Signaling server closed the connection");
                        let _ = inbound_tx.send(TransportEvent::Closed(reason));
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Websocket error: {}", e);
                        let _ = inbound_tx.send(TransportEvent::Closed(Some(e.to_string())));
                        return;
                    }
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed(None));
        });

        Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
            tasks: ConnectionTasks { writer, reader },
        }
    }
}

/// Open the signaling channel to `url`
pub async fn connect(url: &str) -> Result<SignalConnection, TransportError> {
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    info!("Connected to signaling server at {}", url);
    Ok(SignalConnection::from_stream(ws))
}
