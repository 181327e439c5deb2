//! Flash access control (wait states and prefetch)

use metronome_core::FlashTiming;
use metronome_hal::{Poll, RegisterBank};

use crate::chip::Chip;
use crate::registers::flash;

/// Flash wait-state and prefetch register access
pub struct AccessControl<'a, B: ?Sized, P> {
    chip: Chip<'a, B, P>,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> AccessControl<'a, B, P> {
    pub fn new(chip: Chip<'a, B, P>) -> Self {
        Self { chip }
    }

    /// Write LATENCY and PRFTBE in one read-modify-write
    ///
    /// Takes effect on the next flash access; nothing to wait for.
    pub fn apply(&self, timing: FlashTiming) {
        self.chip.regs().modify(flash::ACR, |v| {
            let v = flash::ACR_LATENCY.write(v, u32::from(timing.wait_states));
            if timing.prefetch {
                v | flash::ACR_PRFTBE
            } else {
                v & !flash::ACR_PRFTBE
            }
        });

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "flash timing: {} wait states, prefetch {}",
            timing.wait_states,
            timing.prefetch
        );
    }

    /// Read the timing in force
    pub fn current(&self) -> FlashTiming {
        let acr = self.chip.regs().read(flash::ACR);
        FlashTiming {
            wait_states: flash::ACR_LATENCY.read(acr) as u8,
            prefetch: acr & flash::ACR_PRFTBE != 0,
        }
    }

    /// Check whether the prefetch buffer is actually enabled (PRFTBS)
    pub fn prefetch_active(&self) -> bool {
        self.chip.regs().is_set(flash::ACR, flash::ACR_PRFTBS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;

    #[test]
    fn test_reset_timing() {
        let sim = SimChip::f051();
        let access = AccessControl::new(Chip::new(&sim, sim.device()));
        assert_eq!(access.current(), FlashTiming::default());
        assert!(access.prefetch_active());
    }

    #[test]
    fn test_apply_preserves_other_bits() {
        let sim = SimChip::f051();
        let access = AccessControl::new(Chip::new(&sim, sim.device()));
        access.apply(FlashTiming {
            wait_states: 1,
            prefetch: false,
        });
        assert_eq!(sim.peek(flash::ACR), 0x21);

        access.apply(FlashTiming {
            wait_states: 0,
            prefetch: true,
        });
        assert_eq!(sim.peek(flash::ACR), 0x30);
    }

    #[test]
    fn test_apply_is_single_write() {
        let sim = SimChip::f051();
        let access = AccessControl::new(Chip::new(&sim, sim.device()));
        access.apply(FlashTiming {
            wait_states: 1,
            prefetch: true,
        });
        assert_eq!(sim.writes().as_slice(), &[(flash::ACR, 0x31)]);
    }
}
