//! Pure state transition function

use super::{Effect, Event, GenerationState};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug, PartialEq, Eq)]
pub struct TransitionResult {
    pub new_state: GenerationState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: GenerationState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Reasons a new question is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("A generation is already in progress; interrupt it or wait for it to finish")]
    GenerationInProgress,
    #[error("The previous generation is still stopping; try again in a moment")]
    CancellationInProgress,
}

/// Pure transition function.
///
/// Interrupts while idle or already cancelling, and completions reported for
/// an epoch that no longer holds the slot, leave the state untouched.
pub fn transition(
    state: &GenerationState,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (*state, event) {
        (GenerationState::Idle, Event::Begin { epoch }) => {
            Ok(TransitionResult::new(GenerationState::Active { epoch })
                .with_effect(Effect::Start { epoch }))
        }
        (GenerationState::Active { .. }, Event::Begin { .. }) => {
            Err(TransitionError::GenerationInProgress)
        }
        (GenerationState::Cancelling { .. }, Event::Begin { .. }) => {
            Err(TransitionError::CancellationInProgress)
        }

        (GenerationState::Active { epoch }, Event::Interrupt) => {
            Ok(TransitionResult::new(GenerationState::Cancelling { epoch })
                .with_effect(Effect::Cancel { epoch }))
        }
        (GenerationState::Idle | GenerationState::Cancelling { .. }, Event::Interrupt) => {
            Ok(TransitionResult::new(*state))
        }

        (
            GenerationState::Active { epoch: current } | GenerationState::Cancelling { epoch: current },
            Event::Finished { epoch },
        ) if current == epoch => Ok(TransitionResult::new(GenerationState::Idle)),
        (_, Event::Finished { .. }) => Ok(TransitionResult::new(*state)),
    }
}
