//! Per-connection relay runtime
//!
//! A dispatcher reads client frames and starts at most one generation
//! pipeline at a time. Every outbound frame goes through a [`FrameSender`]
//! into the connection's single writer task.

mod coordinator;
mod dispatcher;
mod persist;
mod pipeline;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use coordinator::{GenerationTicket, InterruptCoordinator};
pub use dispatcher::Dispatcher;
pub use persist::PersistenceSink;
pub use traits::*;

use crate::wire::FinalResponse;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Collaborators shared by every connection
#[derive(Clone)]
pub struct RelayServices {
    pub upstream: Arc<dyn UpstreamClient>,
    pub directory: Arc<dyn ProjectDirectory>,
    pub sink: PersistenceSink,
}

impl RelayServices {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        directory: Arc<dyn ProjectDirectory>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            upstream,
            directory,
            sink: PersistenceSink::new(store),
        }
    }
}

/// Cloneable handle onto a connection's bounded outbound queue
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<FinalResponse>,
}

impl FrameSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FinalResponse>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a frame for the writer. Returns false once the writer is gone.
    pub async fn send(&self, frame: FinalResponse) -> bool {
        self.tx.send(frame).await.is_ok()
    }
}
