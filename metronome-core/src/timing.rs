//! Flash access timing rules
//!
//! Flash reads need one extra wait state above 24 MHz. The wait-state
//! setting must be sufficient for the running frequency at every instant:
//! it is raised before a switch to a faster clock and lowered only after a
//! switch to a slower one has been confirmed.

use metronome_hal::Hertz;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Highest system clock that runs with zero wait states
pub const ZERO_WAIT_STATE_MAX: Hertz = Hertz::mhz(24);

/// Minimum number of flash wait states for a system clock frequency
pub fn required_wait_states(frequency: Hertz) -> u8 {
    if frequency <= ZERO_WAIT_STATE_MAX {
        0
    } else {
        1
    }
}

/// Flash access control state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FlashTiming {
    /// Wait states inserted in each flash access
    pub wait_states: u8,
    /// Prefetch buffer enabled
    pub prefetch: bool,
}

impl FlashTiming {
    /// Minimum sufficient timing for a system clock frequency
    pub fn for_frequency(frequency: Hertz, prefetch: bool) -> Self {
        Self {
            wait_states: required_wait_states(frequency),
            prefetch,
        }
    }

    /// Whether this setting may be used while running at `frequency`
    pub fn supports(&self, frequency: Hertz) -> bool {
        self.wait_states >= required_wait_states(frequency)
    }
}

impl Default for FlashTiming {
    /// Reset state: zero wait states, prefetch enabled
    fn default() -> Self {
        Self {
            wait_states: 0,
            prefetch: true,
        }
    }
}

/// When to write the flash timing during a clock transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimingSchedule {
    /// Apply before any frequency change (raising wait states)
    pub before_switch: Option<FlashTiming>,
    /// Apply after the source switch is confirmed (lowering, or prefetch only)
    pub after_switch: Option<FlashTiming>,
}

impl TimingSchedule {
    /// Schedule the move from the current timing to the target timing
    ///
    /// Raise before switching up, lower after switching down. Nothing is
    /// written when the timing already matches.
    pub fn between(current: FlashTiming, target: FlashTiming) -> Self {
        if target.wait_states > current.wait_states {
            Self {
                before_switch: Some(target),
                after_switch: None,
            }
        } else if target != current {
            Self {
                before_switch: None,
                after_switch: Some(target),
            }
        } else {
            Self::default()
        }
    }
}
