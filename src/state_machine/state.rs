//! Generation state types

/// Identifies one generation on a connection
pub type Epoch = u64;

/// Per-connection generation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    /// No generation running
    #[default]
    Idle,
    /// One generation running with a live cancel signal
    Active { epoch: Epoch },
    /// Cancel signal delivered, waiting for the pipeline to wind down
    Cancelling { epoch: Epoch },
}

impl GenerationState {
    /// The epoch currently holding the slot, if any
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            GenerationState::Idle => None,
            GenerationState::Active { epoch } | GenerationState::Cancelling { epoch } => {
                Some(*epoch)
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, GenerationState::Idle)
    }
}
