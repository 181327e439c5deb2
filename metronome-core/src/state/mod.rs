//! State machine for a clock tree transition
//!
//! A transition walks a fixed sequence of phases. The hardware driver
//! feeds an event into the machine as each phase completes, so the current
//! state always names the phase the registers are in.

pub mod events;
pub mod machine;

pub use events::Event;
pub use machine::State;
