//! Client frame dispatch

use super::pipeline::Pipeline;
use super::{FrameSender, InterruptCoordinator, RelayServices};
use crate::wire::{ClientFrame, FinalResponse, FrameKind};
use futures::{Stream, StreamExt};

/// Reads one connection's frames and starts generations
pub struct Dispatcher {
    chat_id: String,
    identity: Option<String>,
    coordinator: InterruptCoordinator,
    services: RelayServices,
    frames: FrameSender,
}

impl Dispatcher {
    pub fn new(
        chat_id: impl Into<String>,
        identity: Option<String>,
        coordinator: InterruptCoordinator,
        services: RelayServices,
        frames: FrameSender,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            identity,
            coordinator,
            services,
            frames,
        }
    }

    /// Process frames until the client stream ends.
    ///
    /// Does not cancel a running generation on return; the caller decides
    /// whether a closed stream means the connection is gone.
    pub async fn run<S>(self, mut incoming: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        tracing::debug!(chat_id = %self.chat_id, "Dispatcher started");
        while let Some(raw) = incoming.next().await {
            self.handle_frame(&raw).await;
        }
        tracing::debug!(chat_id = %self.chat_id, "Dispatcher stopped");
    }

    async fn handle_frame(&self, raw: &str) {
        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(chat_id = %self.chat_id, error = %e, "Dropping client frame");
                return;
            }
        };

        match frame.kind() {
            FrameKind::Interrupt => {
                tracing::info!(chat_id = %self.chat_id, "Interrupt requested");
                self.coordinator.request_interrupt();
            }
            FrameKind::Question(question) => self.start_generation(question, frame).await,
            FrameKind::Noop => {
                tracing::debug!(chat_id = %self.chat_id, "Frame carries no question, ignoring");
            }
        }
    }

    async fn start_generation(&self, question: String, frame: ClientFrame) {
        let ticket = match self.coordinator.begin_generation() {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(chat_id = %self.chat_id, error = %e, "Question rejected");
                self.frames.send(FinalResponse::error(e)).await;
                return;
            }
        };

        tracing::info!(
            chat_id = %self.chat_id,
            epoch = ticket.epoch(),
            db_used = frame.db_used,
            docs_used = frame.docs_used,
            "Question received"
        );

        let pipeline = Pipeline {
            chat_id: self.chat_id.clone(),
            identity: self.identity.clone(),
            question,
            frame,
            ticket,
            services: self.services.clone(),
            frames: self.frames.clone(),
        };
        tokio::spawn(pipeline.run());
    }
}
