//! WebSocket forwarder to the generation backend

use super::{UpstreamError, UpstreamRequest, UpstreamStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one outbound connection per generation
pub struct WsForwarder {
    url: String,
    connect_timeout: Duration,
    buffer: usize,
}

impl WsForwarder {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            buffer: 32,
        }
    }

    /// Dial the backend, send `request` as the first frame and return the
    /// stream of payloads that follow.
    ///
    /// The stream ends when the backend closes the connection or a read
    /// fails. Dropping the stream closes the connection.
    pub async fn forward(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamError> {
        let body = serde_json::to_string(request)
            .map_err(|e| UpstreamError::encode(format!("failed to encode upstream request: {e}")))?;

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                UpstreamError::dial(format!(
                    "timed out after {}s connecting to {}",
                    self.connect_timeout.as_secs(),
                    self.url
                ))
            })?
            .map_err(|e| UpstreamError::dial(format!("failed to connect to {}: {e}", self.url)))?;

        let (mut sink, source) = socket.split();
        if let Err(e) = sink.send(Message::Text(body)).await {
            let _ = sink.close().await;
            return Err(UpstreamError::send(format!("failed to send upstream request: {e}")));
        }

        tracing::debug!(url = %self.url, chat_id = %request.chat_id(), "Upstream request sent");

        let (tx, rx) = mpsc::channel(self.buffer);
        let chat_id = request.chat_id().to_string();
        tokio::spawn(async move {
            pump_payloads(sink, source, tx, &chat_id).await;
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Read upstream frames into `tx` until the backend closes, a read fails,
/// or the consumer drops its end. Always closes the connection on exit.
async fn pump_payloads(
    mut sink: futures::stream::SplitSink<UpstreamSocket, Message>,
    mut source: futures::stream::SplitStream<UpstreamSocket>,
    tx: mpsc::Sender<String>,
    chat_id: &str,
) {
    let mut relayed: usize = 0;

    loop {
        tokio::select! {
            () = tx.closed() => {
                tracing::debug!(chat_id, relayed, "Upstream stream abandoned by consumer");
                break;
            }
            next = source.next() => {
                let payload = match next {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!(chat_id, "Ignoring non UTF-8 binary upstream frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(chat_id, relayed, "Upstream closed the stream");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        // A read error ends the stream like a close does
                        tracing::debug!(chat_id, relayed, error = %e, "Upstream read ended");
                        break;
                    }
                };

                if tx.send(payload).await.is_err() {
                    break;
                }
                relayed += 1;
            }
        }
    }

    let _ = sink.close().await;
}
