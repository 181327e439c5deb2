//! Reset and clock control drivers

pub mod gate;
pub mod oscillator;
pub mod pll;
pub mod tree;

pub use gate::{Bus, PeripheralGate, PeripheralId};
pub use oscillator::Oscillators;
pub use pll::Pll;
pub use tree::ClockTree;
