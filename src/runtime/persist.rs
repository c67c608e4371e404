//! Commits completed turns

use super::traits::MessageStore;
use std::sync::Arc;

/// Writes one question/answer pair per finished generation
#[derive(Clone)]
pub struct PersistenceSink {
    store: Arc<dyn MessageStore>,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Persist the turn if an answer was captured. Failures are logged only;
    /// the client has already seen every frame by the time this runs.
    pub async fn commit(&self, chat_id: &str, user_id: &str, question: &str, answer: &str) -> bool {
        if answer.is_empty() {
            tracing::debug!(chat_id, "No answer captured, skipping persistence");
            return false;
        }
        match self.store.record_turn(chat_id, user_id, question, answer).await {
            Ok(()) => {
                tracing::info!(chat_id, answer_len = answer.len(), "Turn persisted");
                true
            }
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Failed to persist turn");
                false
            }
        }
    }
}
