//! Events that drive the generation state machine

use super::state::Epoch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A question was accepted and allocated `epoch`
    Begin { epoch: Epoch },
    /// The client asked to stop the current generation
    Interrupt,
    /// The pipeline for `epoch` exited, for any reason
    Finished { epoch: Epoch },
}
