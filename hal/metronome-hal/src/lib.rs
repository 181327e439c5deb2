//! Metronome Hardware Abstraction Layer
//!
//! This crate defines the seams between the clock-tree and flash sequencing
//! logic and the hardware it drives. Chip-specific HALs implement the
//! register access; collaborators (GPIO, timers, serial drivers) consume the
//! clock traits without knowing anything about the clock tree itself.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Peripheral drivers (collaborators)     │
//! └─────────────────────────────────────────┘
//!                     │  ClockGate / BusClock
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  metronome-hal (this crate - traits)    │
//! └─────────────────────────────────────────┘
//!                     │  RegisterBank / Poll
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  MMIO (chip)  │       │  simulated    │
//! │               │       │  register bank│
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`register::RegisterBank`] - Word and half-word access to a register space
//! - [`poll::Poll`] - Strategy for busy-waiting on hardware status flags
//! - [`clock::ClockGate`], [`clock::BusClock`] - Surface consumed by peripheral drivers
//! - [`flash::FlashError`] - Flash operation failure classification

#![no_std]
#![deny(unsafe_code)]

pub mod clock;
pub mod flash;
pub mod poll;
pub mod register;
pub mod time;

// Re-export key traits at crate root for convenience
pub use clock::{BusClock, ClockGate};
pub use flash::FlashError;
pub use poll::{Bounded, Poll, Spin};
pub use register::{Field, RegisterBank};
pub use time::Hertz;
