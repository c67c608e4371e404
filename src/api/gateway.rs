//! Connection gateway
//!
//! Owns one upgraded client socket: the read half feeds the dispatcher, the
//! write half belongs to a single writer task fed through a bounded queue.

use super::AppState;
use crate::runtime::{Dispatcher, FrameSender, InterruptCoordinator};
use crate::wire::FinalResponse;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Serve one chat connection until the client goes away
pub async fn serve_connection(
    socket: WebSocket,
    chat_id: String,
    identity: Option<String>,
    state: AppState,
) {
    let (sink, source) = socket.split();
    let incoming = client_frames(source, chat_id.clone());
    relay(
        incoming,
        sink,
        chat_id,
        identity,
        state,
        InterruptCoordinator::new(),
    )
    .await;
}

/// Drive one connection's frames in both directions, returning once the
/// incoming side ends and every queued frame has been written
async fn relay<I, S>(
    incoming: I,
    sink: S,
    chat_id: String,
    identity: Option<String>,
    state: AppState,
    coordinator: InterruptCoordinator,
) where
    I: Stream<Item = String>,
    S: Sink<Message> + Send + Unpin + 'static,
    S::Error: Display + Send,
{
    tracing::info!(chat_id = %chat_id, "Chat connection opened");
    let (frames, outbound) = FrameSender::channel(state.outbound_queue);
    let writer = tokio::spawn(write_frames(
        sink,
        outbound,
        state.ping_interval,
        chat_id.clone(),
    ));

    let dispatcher = Dispatcher::new(
        chat_id.clone(),
        identity,
        coordinator.clone(),
        state.services,
        frames,
    );
    dispatcher.run(std::pin::pin!(incoming)).await;

    if let Some(epoch) = coordinator.request_interrupt() {
        tracing::info!(chat_id = %chat_id, epoch, "Client left mid-generation, cancelled");
    }

    // Writer exits once every pipeline has dropped its sender
    if let Err(e) = writer.await {
        tracing::error!(chat_id = %chat_id, error = %e, "Writer task panicked");
    }
    tracing::info!(chat_id = %chat_id, "Chat connection closed");
}

/// Text payloads from the client until it closes or the read fails
fn client_frames(source: SplitStream<WebSocket>, chat_id: String) -> impl Stream<Item = String> {
    futures::stream::unfold(source, move |mut source| {
        let chat_id = chat_id.clone();
        async move {
            loop {
                match source.next().await? {
                    Ok(Message::Text(text)) => return Some((text, source)),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => return Some((text, source)),
                        Err(_) => {
                            tracing::warn!(chat_id = %chat_id, "Dropping non UTF-8 binary frame");
                        }
                    },
                    Ok(Message::Close(reason)) => {
                        tracing::debug!(chat_id = %chat_id, ?reason, "Client sent close");
                        return None;
                    }
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Err(e) => {
                        tracing::debug!(chat_id = %chat_id, error = %e, "Client read failed");
                        return None;
                    }
                }
            }
        }
    })
}

async fn write_frames<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<FinalResponse>,
    ping_interval: Duration,
    chat_id: String,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(chat_id = %chat_id, error = %e, "Failed to encode client frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(chat_id = %chat_id, error = %e, "Client write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}
