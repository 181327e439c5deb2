//! Busy-wait strategies
//!
//! Hardware status flags (oscillator ready, switch status, flash busy) are
//! waited on by tight polling with no timeout. The wait itself is isolated
//! behind [`Poll`] so tests can bound it instead of hanging.

/// Strategy for waiting until a hardware condition holds
pub trait Poll: Copy {
    /// Call `ready` repeatedly until it returns `true`
    fn until(&self, ready: impl FnMut() -> bool);
}

/// Production strategy: spin forever until the condition holds
///
/// An oscillator that never starts (e.g. a missing crystal) hangs the
/// caller. This matches the hardware contract; nothing is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Spin;

impl Poll for Spin {
    fn until(&self, mut ready: impl FnMut() -> bool) {
        while !ready() {
            core::hint::spin_loop();
        }
    }
}

/// Test strategy: give up after a fixed number of polls
///
/// Exceeding the limit panics, turning a hardware hang into a test failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bounded {
    limit: u32,
}

impl Bounded {
    /// Allow at most `limit` evaluations of the condition
    pub const fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// Maximum number of evaluations
    pub const fn limit(&self) -> u32 {
        self.limit
    }
}

impl Default for Bounded {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl Poll for Bounded {
    fn until(&self, mut ready: impl FnMut() -> bool) {
        for _ in 0..self.limit {
            if ready() {
                return;
            }
        }
        panic!("hardware flag not observed within {} polls", self.limit);
    }
}
