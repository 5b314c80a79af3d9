// Call module — 1:1 call state

pub mod state;

pub use state::{Affordances, CallMachine, CallState, CallStateError, CallStatus, CallTrigger};
