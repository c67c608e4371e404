//! Per-connection interrupt coordination
//!
//! Owns the generation state, the epoch counter and the cancel token of the
//! generation holding the slot. All three live behind one mutex so a cancel
//! can never race a completion.

use crate::state_machine::{transition, Effect, Epoch, Event, GenerationState, TransitionError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Slot {
    state: GenerationState,
    last_epoch: Epoch,
    token: Option<CancellationToken>,
}

/// Cloneable handle; all clones share one slot
#[derive(Clone, Default)]
pub struct InterruptCoordinator {
    slot: Arc<Mutex<Slot>>,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        lock_slot(&self.slot)
    }

    #[allow(dead_code)] // Inspected by tests
    pub fn state(&self) -> GenerationState {
        self.lock().state
    }

    /// Claim the slot for a new generation
    pub fn begin_generation(&self) -> Result<GenerationTicket, TransitionError> {
        let mut slot = self.lock();
        let epoch = slot.last_epoch + 1;
        let result = transition(&slot.state, Event::Begin { epoch })?;

        let token = CancellationToken::new();
        slot.last_epoch = epoch;
        slot.state = result.new_state;
        for effect in result.effects {
            if let Effect::Start { epoch: started } = effect {
                slot.token = Some(token.clone());
                tracing::debug!(epoch = started, "Generation started");
            }
        }

        Ok(GenerationTicket {
            epoch,
            token,
            slot: Arc::clone(&self.slot),
        })
    }

    /// Cancel the active generation. Returns the epoch that was signalled,
    /// or `None` when there was nothing to cancel.
    pub fn request_interrupt(&self) -> Option<Epoch> {
        let mut slot = self.lock();
        let Ok(result) = transition(&slot.state, Event::Interrupt) else {
            return None;
        };
        slot.state = result.new_state;

        let mut cancelled = None;
        for effect in result.effects {
            if let Effect::Cancel { epoch } = effect {
                if let Some(token) = slot.token.take() {
                    token.cancel();
                    cancelled = Some(epoch);
                }
            }
        }
        match cancelled {
            Some(epoch) => tracing::info!(epoch, "Interrupt delivered"),
            None => tracing::debug!(state = ?slot.state, "Interrupt ignored, nothing to cancel"),
        }
        cancelled
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof of holding the generation slot. Dropping it releases the slot.
pub struct GenerationTicket {
    epoch: Epoch,
    token: CancellationToken,
    slot: Arc<Mutex<Slot>>,
}

impl GenerationTicket {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for GenerationTicket {
    fn drop(&mut self) {
        let mut slot = lock_slot(&self.slot);
        if let Ok(result) = transition(&slot.state, Event::Finished { epoch: self.epoch }) {
            if result.new_state != slot.state {
                slot.token = None;
            }
            slot.state = result.new_state;
        }
        tracing::debug!(epoch = self.epoch, "Generation finished");
    }
}
