//! Effects produced by state transitions

use super::state::Epoch;

/// Effects the coordinator executes after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Install a fresh cancel signal for `epoch`
    Start { epoch: Epoch },
    /// Trigger the cancel signal belonging to `epoch`
    Cancel { epoch: Epoch },
}
