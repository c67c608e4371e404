//! Per-connection generation state machine
//!
//! Pure transitions in the Elm Architecture style; the coordinator in
//! `runtime` owns the state and executes the effects.

mod effect;
mod event;
mod state;
mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{Epoch, GenerationState};
pub use transition::{transition, TransitionError};
