//! Frequency units

use core::fmt;
use core::ops::Div;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A frequency in hertz
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Hertz(pub u32);

impl Hertz {
    /// Frequency from a value in hertz
    pub const fn hz(hz: u32) -> Self {
        Self(hz)
    }

    /// Frequency from a value in kilohertz
    pub const fn khz(khz: u32) -> Self {
        Self(khz * 1_000)
    }

    /// Frequency from a value in megahertz
    pub const fn mhz(mhz: u32) -> Self {
        Self(mhz * 1_000_000)
    }

    /// Raw value in hertz
    pub const fn to_hz(self) -> u32 {
        self.0
    }

    /// Multiply by an integer factor, `None` on overflow
    pub const fn checked_mul(self, factor: u32) -> Option<Self> {
        match self.0.checked_mul(factor) {
            Some(hz) => Some(Self(hz)),
            None => None,
        }
    }

    /// Multiply by an integer factor, clamping at `u32::MAX` Hz
    pub const fn saturating_mul(self, factor: u32) -> Self {
        Self(self.0.saturating_mul(factor))
    }
}

impl Div<u32> for Hertz {
    type Output = Hertz;

    fn div(self, divisor: u32) -> Hertz {
        Hertz(self.0 / divisor)
    }
}

impl From<Hertz> for u32 {
    fn from(value: Hertz) -> Self {
        value.0
    }
}

impl fmt::Display for Hertz {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1_000_000 == 0 {
            write!(f, "{} MHz", self.0 / 1_000_000)
        } else if self.0 % 1_000 == 0 {
            write!(f, "{} kHz", self.0 / 1_000)
        } else {
            write!(f, "{} Hz", self.0)
        }
    }
}
