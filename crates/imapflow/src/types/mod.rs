//! Core IMAP types.
//!
//! Status words, capabilities, flags and the connection state machine.

mod capability;
mod flags;
mod state;

pub use capability::{Capability, Status};
pub use flags::Flag;
pub use state::{ConnectionState, IdleState};
