//! STM32F0 clock tree and flash drivers
//!
//! Register-level drivers built on the board-agnostic rules in
//! `metronome-core`. Every driver borrows a [`Chip`], which couples a
//! [`RegisterBank`](metronome_hal::RegisterBank) with the resolved
//! [`Device`](metronome_core::Device) and a polling strategy.
//!
//! - [`rcc::ClockTree`] applies a validated clock configuration in a
//!   glitch-free order, with [`rcc::Oscillators`], [`rcc::Pll`] and
//!   [`rcc::PeripheralGate`] for the individual blocks
//! - [`flash::FlashEngine`] drives page erase, mass erase and half-word
//!   programming; [`flash::FlashRegion`] exposes a region through
//!   `embedded-storage`
//! - [`store::ProfileStore`] persists a clock profile in flash
//!
//! # Features
//!
//! - `defmt` - Enable debug formatting and logging
//! - `sim` - Export [`sim::SimChip`], a register-level model of the RCC and
//!   flash controller for host-side testing
//!
//! # Usage
//!
//! ```ignore
//! let mmio = unsafe { Mmio::new() };
//! let chip = Chip::identify(&mmio).ok_or(Error::UnknownDevice)?;
//! let clocks = ClockTree::new(chip).apply(&ClockTreeConfig::hsi_pll_48mhz())?;
//! ```

#![no_std]
#![deny(unsafe_code)]

pub mod chip;
pub mod flash;
#[allow(unsafe_code)]
pub mod mmio;
pub mod rcc;
pub mod registers;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod store;

pub use chip::Chip;
pub use flash::{FlashEngine, FlashRegion, FlashStatus};
pub use mmio::Mmio;
pub use rcc::{ClockTree, PeripheralGate, PeripheralId};
pub use store::{ProfileStore, StoreError};

// Re-export shared types
pub use metronome_hal::{FlashError, Hertz};
