//! Clock surface consumed by peripheral drivers
//!
//! GPIO, timer and serial drivers live outside this workspace. They only
//! need two things from the clock tree: a way to ungate their bus clock,
//! and the frequency that clock currently runs at.

use crate::time::Hertz;

/// Per-peripheral bus clock gating
///
/// Gating is an independent read-modify-write of an enable bit; there is no
/// ordering constraint against clock-tree transitions.
pub trait ClockGate {
    /// Identifier naming one peripheral's enable bit
    type Id: Copy;

    /// Enable the bus clock of a peripheral
    ///
    /// Identifiers the device does not implement are ignored.
    fn enable(&self, id: Self::Id);

    /// Disable the bus clock of a peripheral
    fn disable(&self, id: Self::Id);

    /// Check whether a peripheral's bus clock is enabled
    fn is_enabled(&self, id: Self::Id) -> bool;
}

/// Read access to the active system clock
pub trait BusClock {
    /// Current system clock frequency, decoded from the hardware state
    fn current_frequency(&self) -> Hertz;
}
