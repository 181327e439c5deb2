//! Clock tree configuration
//!
//! A [`ClockTreeConfig`] describes the requested clock tree. Validating it
//! against a [`Device`](crate::device::Device) yields a [`ClockPlan`], the
//! only form the hardware drivers accept.

pub mod plan;
pub mod toml;
pub mod types;

pub use plan::*;
pub use types::*;
