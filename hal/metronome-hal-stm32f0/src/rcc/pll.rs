//! PLL configuration
//!
//! The PLL may only be reprogrammed while it is off. [`Pll::configure`]
//! stops it first when needed and leaves it stopped; [`Pll::enable`] starts
//! it and waits for lock.

use metronome_core::config::{ConfigError, PllConfig, PllMul, PllSource, PreDiv};
use metronome_core::DeviceFamily;
use metronome_hal::{Field, Hertz, Poll, RegisterBank};

use crate::chip::Chip;
use crate::registers::rcc;

/// PLLMUL field value for a multiplier
pub fn encode_multiplier(multiplier: PllMul) -> u32 {
    u32::from(multiplier.value()) - 2
}

/// Multiplier for a PLLMUL field value
///
/// Encodings 14 and 15 both select ×16.
pub fn decode_multiplier(bits: u32) -> u8 {
    match bits & 0xF {
        raw @ 0..=13 => raw as u8 + 2,
        _ => 16,
    }
}

/// PLL source selector field for a family
pub fn source_field(family: DeviceFamily) -> Field {
    match family.pll_source_width() {
        1 => rcc::CFGR_PLLSRC_NARROW,
        _ => rcc::CFGR_PLLSRC_WIDE,
    }
}

/// PLLSRC field value for a source, `None` if the family cannot select it
pub fn encode_source(family: DeviceFamily, source: PllSource) -> Option<u32> {
    match (family, source) {
        (DeviceFamily::F03xF05x, PllSource::HsiDiv2) => Some(0),
        (DeviceFamily::F03xF05x, PllSource::HsePrediv) => Some(1),
        (DeviceFamily::F03xF05x, _) => None,
        (DeviceFamily::F04xF07xF09x, PllSource::HsiDiv2) => Some(0b00),
        (DeviceFamily::F04xF07xF09x, PllSource::HsiPrediv) => Some(0b01),
        (DeviceFamily::F04xF07xF09x, PllSource::HsePrediv) => Some(0b10),
        (DeviceFamily::F04xF07xF09x, PllSource::Hsi48Prediv) => Some(0b11),
    }
}

/// Source selected by a PLLSRC field value
pub fn decode_source(family: DeviceFamily, bits: u32) -> PllSource {
    match (family, bits) {
        (DeviceFamily::F03xF05x, 0) => PllSource::HsiDiv2,
        (DeviceFamily::F03xF05x, _) => PllSource::HsePrediv,
        (DeviceFamily::F04xF07xF09x, 0b00) => PllSource::HsiDiv2,
        (DeviceFamily::F04xF07xF09x, 0b01) => PllSource::HsiPrediv,
        (DeviceFamily::F04xF07xF09x, 0b10) => PllSource::HsePrediv,
        (DeviceFamily::F04xF07xF09x, _) => PllSource::Hsi48Prediv,
    }
}

/// PLL configurator
pub struct Pll<'a, B: ?Sized, P> {
    chip: Chip<'a, B, P>,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> Pll<'a, B, P> {
    pub fn new(chip: Chip<'a, B, P>) -> Self {
        Self { chip }
    }

    /// Check whether PLLON is set
    pub fn is_enabled(&self) -> bool {
        self.chip.regs().is_set(rcc::CR, rcc::CR_PLLON)
    }

    /// Check whether the PLL is locked
    pub fn is_locked(&self) -> bool {
        self.chip.regs().is_set(rcc::CR, rcc::CR_PLLON | rcc::CR_PLLRDY)
    }

    /// Program source, multiplier and pre-divider
    ///
    /// A running PLL is stopped first and left stopped. Sources the device
    /// family cannot select are refused before any register is written.
    pub fn configure(&self, config: &PllConfig) -> Result<(), ConfigError> {
        let family = self.chip.device().family;
        let source =
            encode_source(family, config.source).ok_or(ConfigError::UnsupportedPllSource)?;

        if self.is_enabled() {
            self.disable();
        }

        let regs = self.chip.regs();
        regs.modify(rcc::CFGR2, |v| {
            rcc::CFGR2_PREDIV.write(v, u32::from(config.prediv.value()) - 1)
        });
        regs.modify(rcc::CFGR, |v| {
            let v = source_field(family).write(v, source);
            rcc::CFGR_PLLMUL.write(v, encode_multiplier(config.multiplier))
        });

        #[cfg(feature = "defmt")]
        defmt::debug!(
            "PLL configured: {} x{} /{}",
            config.source,
            config.multiplier.value(),
            config.prediv.value()
        );

        Ok(())
    }

    /// Start the PLL and wait for lock
    pub fn enable(&self) {
        self.chip.regs().set_bits(rcc::CR, rcc::CR_PLLON);
        self.chip.wait_set(rcc::CR, rcc::CR_PLLRDY);
    }

    /// Stop the PLL and wait until it reports unlocked
    pub fn disable(&self) {
        self.chip.regs().clear_bits(rcc::CR, rcc::CR_PLLON);
        self.chip.wait_clear(rcc::CR, rcc::CR_PLLRDY);
    }

    /// Read back the programmed settings
    pub fn config(&self) -> PllConfig {
        let regs = self.chip.regs();
        let family = self.chip.device().family;
        let cfgr = regs.read(rcc::CFGR);
        let prediv = rcc::CFGR2_PREDIV.read(regs.read(rcc::CFGR2)) as u8 + 1;
        let multiplier = decode_multiplier(rcc::CFGR_PLLMUL.read(cfgr));

        PllConfig {
            source: decode_source(family, source_field(family).read(cfgr)),
            multiplier: PllMul::saturating(multiplier),
            prediv: PreDiv::new(prediv).unwrap_or(PreDiv::DIV1),
        }
    }

    /// Output frequency of the programmed settings
    ///
    /// Saturates at `u32::MAX` Hz if the board's crystal is set too fast to
    /// represent the product.
    pub fn frequency(&self) -> Hertz {
        let config = self.config();
        let device = self.chip.device();
        let oscillator = device.oscillator_frequency(config.source.oscillator());
        config
            .source
            .input_frequency(oscillator, config.prediv)
            .saturating_mul(u32::from(config.multiplier.value()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use metronome_core::Device;
    use metronome_hal::Bounded;
    use proptest::prelude::*;

    fn pll(sim: &SimChip) -> Pll<'_, SimChip, Bounded> {
        Pll::new(Chip::new(sim, sim.device()).with_poll(Bounded::new(100)))
    }

    fn config(source: PllSource, mul: u8) -> PllConfig {
        PllConfig::new(source, PllMul::new(mul).unwrap())
    }

    #[test]
    fn test_multiplier_aliasing() {
        assert_eq!(decode_multiplier(0), 2);
        assert_eq!(decode_multiplier(13), 15);
        assert_eq!(decode_multiplier(14), 16);
        assert_eq!(decode_multiplier(15), 16);
    }

    #[test]
    fn test_source_tables() {
        assert_eq!(decode_source(DeviceFamily::F03xF05x, 1), PllSource::HsePrediv);
        assert_eq!(decode_source(DeviceFamily::F04xF07xF09x, 0b01), PllSource::HsiPrediv);
        assert_eq!(decode_source(DeviceFamily::F04xF07xF09x, 0b11), PllSource::Hsi48Prediv);
        assert_eq!(encode_source(DeviceFamily::F03xF05x, PllSource::Hsi48Prediv), None);
    }

    #[test]
    fn test_narrow_selector_writes_bit_16() {
        let sim = SimChip::f051();
        pll(&sim).configure(&config(PllSource::HsePrediv, 6)).unwrap();
        let cfgr = sim.peek(rcc::CFGR);
        assert_eq!(cfgr & (1 << 16), 1 << 16);
        assert_eq!(cfgr & (1 << 15), 0);
        assert_eq!(rcc::CFGR_PLLMUL.read(cfgr), 4);
    }

    #[test]
    fn test_wide_selector_writes_bits_16_15() {
        let sim = SimChip::f072();
        pll(&sim).configure(&config(PllSource::HsiPrediv, 6)).unwrap();
        assert_eq!(rcc::CFGR_PLLSRC_WIDE.read(sim.peek(rcc::CFGR)), 0b01);
    }

    #[test]
    fn test_unsupported_source_touches_nothing() {
        let sim = SimChip::f051();
        sim.clear_log();
        assert_eq!(
            pll(&sim).configure(&config(PllSource::HsiPrediv, 6)),
            Err(ConfigError::UnsupportedPllSource)
        );
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn test_configure_stops_running_pll() {
        let sim = SimChip::f051();
        let pll = pll(&sim);
        pll.configure(&config(PllSource::HsiDiv2, 6)).unwrap();
        pll.enable();
        assert!(pll.is_locked());

        pll.configure(&config(PllSource::HsiDiv2, 12)).unwrap();
        assert!(!pll.is_enabled());
        assert!(!sim.pll_changed_while_on());
        assert_eq!(pll.config().multiplier.value(), 12);
    }

    #[test]
    fn test_prediv_round_trip() {
        let sim = SimChip::f072();
        let pll = pll(&sim);
        let wanted = config(PllSource::HsePrediv, 12).with_prediv(PreDiv::new(2).unwrap());
        pll.configure(&wanted).unwrap();
        assert_eq!(pll.config(), wanted);
        assert_eq!(pll.frequency(), Hertz::mhz(48));
    }

    #[test]
    fn test_aliased_encoding_reads_as_sixteen() {
        let sim = SimChip::f051();
        sim.write(rcc::CFGR, rcc::CFGR_PLLMUL.write(0, 15));
        let pll = pll(&sim);
        assert_eq!(pll.config().multiplier.value(), 16);
        assert_eq!(pll.frequency(), Hertz::mhz(64));
    }

    #[test]
    fn test_selector_width_follows_family() {
        assert_eq!(source_field(DeviceFamily::F03xF05x).mask(), 1 << 16);
        assert_eq!(source_field(DeviceFamily::F04xF07xF09x).mask(), 0b11 << 15);
    }

    #[test]
    fn test_oversized_crystal_saturates() {
        let sim = SimChip::f051();
        let device = Device::new(DeviceFamily::F03xF05x).with_hse(Hertz(u32::MAX / 4));
        let pll = Pll::new(Chip::new(&sim, device).with_poll(Bounded::new(100)));
        pll.configure(&config(PllSource::HsePrediv, 16)).unwrap();
        assert_eq!(pll.frequency(), Hertz(u32::MAX));
    }

    proptest! {
        #[test]
        fn frequency_is_input_times_multiplier(mul in 2u8..=16) {
            let sim = SimChip::f051();
            let pll = Pll::new(
                Chip::new(&sim, Device::new(DeviceFamily::F03xF05x).with_hse(Hertz::mhz(12)))
                    .with_poll(Bounded::new(100)),
            );

            pll.configure(&config(PllSource::HsiDiv2, mul)).unwrap();
            prop_assert_eq!(pll.frequency(), Hertz::mhz(4 * u32::from(mul)));

            pll.configure(&config(PllSource::HsePrediv, mul)).unwrap();
            prop_assert_eq!(pll.frequency(), Hertz::mhz(12 * u32::from(mul)));
        }

        #[test]
        fn multiplier_encoding_round_trips(mul in 2u8..=16) {
            let encoded = encode_multiplier(PllMul::new(mul).unwrap());
            prop_assert!(encoded <= 14);
            prop_assert_eq!(decode_multiplier(encoded), mul);
        }
    }
}
