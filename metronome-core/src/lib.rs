//! Board-agnostic clock tree logic for STM32F0-class microcontrollers
//!
//! This crate contains everything about a clock transition that does not
//! touch a register:
//!
//! - Device family capabilities and frequency limits
//! - Clock tree configuration types and their validation
//! - The flash wait-state rule and the raise-before / lower-after schedule
//! - State machine for a clock tree transition
//! - Clock profile parsing from TOML text

#![no_std]
#![deny(unsafe_code)]

pub mod config;
pub mod device;
pub mod state;
pub mod timing;

pub use config::{ClockPlan, ClockTreeConfig, Clocks, ConfigError};
pub use device::{Device, DeviceFamily};
pub use metronome_hal::Hertz;
pub use state::{Event, State};
pub use timing::{required_wait_states, FlashTiming};
