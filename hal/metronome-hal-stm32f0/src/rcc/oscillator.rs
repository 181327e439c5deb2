//! Oscillator control
//!
//! Enabling an oscillator blocks until its ready flag is set. There is no
//! timeout under the production wait strategy: a crystal that never starts
//! hangs the caller.

use metronome_core::config::{Oscillator, OscillatorState};
use metronome_hal::{Poll, RegisterBank};

use crate::chip::Chip;
use crate::registers::rcc;

/// Enable/ready bit locations for an oscillator
struct Bits {
    register: u32,
    on: u32,
    ready: u32,
}

fn bits(oscillator: Oscillator) -> Bits {
    match oscillator {
        Oscillator::Hsi => Bits {
            register: rcc::CR,
            on: rcc::CR_HSION,
            ready: rcc::CR_HSIRDY,
        },
        Oscillator::Hse => Bits {
            register: rcc::CR,
            on: rcc::CR_HSEON,
            ready: rcc::CR_HSERDY,
        },
        Oscillator::Hsi48 => Bits {
            register: rcc::CR2,
            on: rcc::CR2_HSI48ON,
            ready: rcc::CR2_HSI48RDY,
        },
    }
}

/// Oscillator controller
pub struct Oscillators<'a, B: ?Sized, P> {
    chip: Chip<'a, B, P>,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> Oscillators<'a, B, P> {
    pub fn new(chip: Chip<'a, B, P>) -> Self {
        Self { chip }
    }

    fn present(&self, oscillator: Oscillator) -> bool {
        self.chip.device().has_oscillator(oscillator)
    }

    /// Start an oscillator and wait until it is stable
    ///
    /// Does nothing for an oscillator the device lacks.
    pub fn enable(&self, oscillator: Oscillator) {
        if !self.present(oscillator) {
            return;
        }
        let bits = bits(oscillator);
        let regs = self.chip.regs();
        if !regs.is_set(bits.register, bits.on) {
            regs.set_bits(bits.register, bits.on);
        }
        self.chip.wait_set(bits.register, bits.ready);

        #[cfg(feature = "defmt")]
        defmt::debug!("{} ready", oscillator);
    }

    /// Stop an oscillator
    ///
    /// The caller must not stop the oscillator driving the system clock.
    pub fn disable(&self, oscillator: Oscillator) {
        if !self.present(oscillator) {
            return;
        }
        let bits = bits(oscillator);
        self.chip.regs().clear_bits(bits.register, bits.on);
    }

    /// Decode an oscillator's state from its enable and ready bits
    pub fn state(&self, oscillator: Oscillator) -> OscillatorState {
        if !self.present(oscillator) {
            return OscillatorState::Disabled;
        }
        let bits = bits(oscillator);
        let value = self.chip.regs().read(bits.register);
        match (value & bits.on != 0, value & bits.ready != 0) {
            (false, _) => OscillatorState::Disabled,
            (true, false) => OscillatorState::Starting,
            (true, true) => OscillatorState::Ready,
        }
    }

    /// Check whether an oscillator is enabled and stable
    pub fn is_ready(&self, oscillator: Oscillator) -> bool {
        self.state(oscillator) == OscillatorState::Ready
    }

    /// Select crystal (`false`) or external clock (`true`) for HSE
    ///
    /// Leaves the bit unchanged while HSE is enabled. After a disable, waits
    /// for the ready flag to drop before writing.
    pub fn set_hse_bypass(&self, bypass: bool) {
        let regs = self.chip.regs();
        if regs.is_set(rcc::CR, rcc::CR_HSEON) {
            return;
        }
        self.chip.wait_clear(rcc::CR, rcc::CR_HSERDY);
        if bypass {
            regs.set_bits(rcc::CR, rcc::CR_HSEBYP);
        } else {
            regs.clear_bits(rcc::CR, rcc::CR_HSEBYP);
        }
    }

    /// HSE bypass currently selected
    pub fn hse_bypass(&self) -> bool {
        self.chip.regs().is_set(rcc::CR, rcc::CR_HSEBYP)
    }

    /// Enable or disable the clock security system on HSE
    pub fn set_css(&self, enabled: bool) {
        let regs = self.chip.regs();
        if enabled {
            regs.set_bits(rcc::CR, rcc::CR_CSSON);
        } else {
            regs.clear_bits(rcc::CR, rcc::CR_CSSON);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use metronome_hal::Bounded;

    fn oscillators(sim: &SimChip) -> Oscillators<'_, SimChip, Bounded> {
        Oscillators::new(Chip::new(sim, sim.device()).with_poll(Bounded::new(100)))
    }

    #[test]
    fn test_enable_waits_for_ready() {
        let sim = SimChip::f051();
        sim.set_startup_polls(5);
        let osc = oscillators(&sim);
        assert_eq!(osc.state(Oscillator::Hse), OscillatorState::Disabled);

        osc.enable(Oscillator::Hse);
        assert_eq!(osc.state(Oscillator::Hse), OscillatorState::Ready);
    }

    #[test]
    fn test_starting_state_visible() {
        let sim = SimChip::f051();
        sim.set_startup_polls(50);
        sim.set_bits(rcc::CR, rcc::CR_HSEON);
        assert_eq!(oscillators(&sim).state(Oscillator::Hse), OscillatorState::Starting);
    }

    #[test]
    fn test_disable_clears_enable_bit() {
        let sim = SimChip::f051();
        let osc = oscillators(&sim);
        osc.enable(Oscillator::Hse);
        osc.disable(Oscillator::Hse);
        assert_eq!(osc.state(Oscillator::Hse), OscillatorState::Disabled);
        assert_eq!(sim.peek(rcc::CR) & rcc::CR_HSEON, 0);
    }

    #[test]
    #[should_panic(expected = "hardware flag not observed")]
    fn test_missing_crystal_hangs() {
        let sim = SimChip::f051();
        sim.fail_oscillator(Oscillator::Hse);
        oscillators(&sim).enable(Oscillator::Hse);
    }

    #[test]
    fn test_hsi48_noop_without_hardware() {
        let sim = SimChip::f051();
        let osc = oscillators(&sim);
        sim.clear_log();
        osc.enable(Oscillator::Hsi48);
        osc.disable(Oscillator::Hsi48);
        assert!(sim.writes().is_empty());
        assert_eq!(osc.state(Oscillator::Hsi48), OscillatorState::Disabled);
    }

    #[test]
    fn test_hsi48_on_large_family() {
        let sim = SimChip::f072();
        let osc = oscillators(&sim);
        osc.enable(Oscillator::Hsi48);
        assert!(osc.is_ready(Oscillator::Hsi48));
    }

    #[test]
    fn test_bypass_only_while_hse_off() {
        let sim = SimChip::f051();
        let osc = oscillators(&sim);
        osc.set_hse_bypass(true);
        assert!(sim.peek(rcc::CR) & rcc::CR_HSEBYP != 0);

        osc.enable(Oscillator::Hse);
        osc.set_hse_bypass(false);
        assert!(sim.peek(rcc::CR) & rcc::CR_HSEBYP != 0);
    }

    #[test]
    fn test_bypass_change_after_hse_stopped() {
        let sim = SimChip::f051();
        sim.set_startup_polls(3);
        let osc = oscillators(&sim);
        osc.enable(Oscillator::Hse);
        assert!(!osc.hse_bypass());

        osc.disable(Oscillator::Hse);
        osc.set_hse_bypass(true);
        assert!(osc.hse_bypass());
        assert_eq!(sim.peek(rcc::CR) & rcc::CR_HSERDY, 0);
    }

    #[test]
    fn test_css_toggle() {
        let sim = SimChip::f051();
        let osc = oscillators(&sim);
        osc.set_css(true);
        assert!(sim.peek(rcc::CR) & rcc::CR_CSSON != 0);
        osc.set_css(false);
        assert_eq!(sim.peek(rcc::CR) & rcc::CR_CSSON, 0);
    }
}
