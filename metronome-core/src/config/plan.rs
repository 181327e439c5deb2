//! Configuration validation
//!
//! Every check runs here, before any register is touched. A
//! [`ClockPlan`] can only be obtained through [`ClockTreeConfig::validate`].

use core::fmt;

use metronome_hal::Hertz;

use super::types::{ClockSource, ClockTreeConfig, Clocks, McoSource, Oscillator};
use crate::device::{
    Device, HCLK_MAX, HSE_MAX_FREQUENCY, HSE_MIN_FREQUENCY, PCLK_MAX, SYSCLK_MAX,
};
use crate::timing::FlashTiming;

/// Clock signal named in a frequency error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockDomain {
    Pll,
    Sysclk,
    Hclk,
    Pclk,
}

/// Reasons a clock tree configuration is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// PLL selected as system source without PLL settings
    MissingPll,
    /// PLL settings given for a non-PLL system source
    PllNotUsed,
    /// System clock source does not exist on this family
    UnsupportedSource(ClockSource),
    /// PLL input cannot be selected on this family
    UnsupportedPllSource,
    /// A derived clock exceeds its rating
    FrequencyTooHigh(ClockDomain),
    /// The derived system clock differs from the requested target
    FrequencyMismatch { expected: Hertz, derived: Hertz },
    /// Board crystal outside the 4 to 32 MHz range
    HseOutOfRange(Hertz),
    /// MCO source does not exist on this family
    McoUnsupported,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingPll => f.write_str("PLL selected but not configured"),
            ConfigError::PllNotUsed => f.write_str("PLL configured but not selected"),
            ConfigError::UnsupportedSource(source) => {
                write!(f, "{:?} not available on this device", source)
            }
            ConfigError::UnsupportedPllSource => {
                f.write_str("PLL input not available on this device")
            }
            ConfigError::FrequencyTooHigh(domain) => write!(f, "{:?} above 48 MHz", domain),
            ConfigError::FrequencyMismatch { expected, derived } => {
                write!(f, "target {} but configuration yields {}", expected, derived)
            }
            ConfigError::HseOutOfRange(hse) => write!(f, "HSE frequency {} out of range", hse),
            ConfigError::McoUnsupported => f.write_str("MCO source not available on this device"),
        }
    }
}

/// A validated configuration with its derived frequencies and flash timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockPlan {
    config: ClockTreeConfig,
    clocks: Clocks,
    timing: FlashTiming,
}

impl ClockPlan {
    /// The accepted configuration
    pub fn config(&self) -> &ClockTreeConfig {
        &self.config
    }

    /// Frequencies the tree runs at once applied
    pub fn clocks(&self) -> Clocks {
        self.clocks
    }

    /// Flash timing required at the target frequency
    pub fn timing(&self) -> FlashTiming {
        self.timing
    }

    /// Oscillator that must be running for this plan
    ///
    /// At most one oscillator is ever needed: the system source itself, or
    /// the input of the PLL.
    pub fn required_oscillator(&self) -> Option<Oscillator> {
        match (self.config.source, self.config.pll) {
            (ClockSource::Pll, Some(pll)) => Some(pll.source.oscillator()),
            (source, _) => source.oscillator(),
        }
    }
}

impl ClockTreeConfig {
    /// Check the configuration against a device and derive its frequencies
    pub fn validate(&self, device: &Device) -> Result<ClockPlan, ConfigError> {
        let sysclk = match (self.source, self.pll) {
            (ClockSource::Pll, None) => return Err(ConfigError::MissingPll),
            (ClockSource::Pll, Some(pll)) => {
                if !pll.source.supported_on(device.family) {
                    return Err(ConfigError::UnsupportedPllSource);
                }
                let input = pll.source.oscillator();
                if !device.has_oscillator(input) {
                    return Err(ConfigError::UnsupportedPllSource);
                }
                check_hse(device, input)?;
                pll.output_frequency(device.oscillator_frequency(input))
                    .filter(|out| *out <= SYSCLK_MAX)
                    .ok_or(ConfigError::FrequencyTooHigh(ClockDomain::Pll))?
            }
            (_, Some(_)) => return Err(ConfigError::PllNotUsed),
            (source, None) => {
                let oscillator = source
                    .oscillator()
                    .ok_or(ConfigError::UnsupportedSource(source))?;
                if !device.has_oscillator(oscillator) {
                    return Err(ConfigError::UnsupportedSource(source));
                }
                check_hse(device, oscillator)?;
                device.oscillator_frequency(oscillator)
            }
        };

        if self.mco == McoSource::Hsi48 && !device.family.has_hsi48() {
            return Err(ConfigError::McoUnsupported);
        }
        if sysclk > SYSCLK_MAX {
            return Err(ConfigError::FrequencyTooHigh(ClockDomain::Sysclk));
        }
        if sysclk != self.target_frequency {
            return Err(ConfigError::FrequencyMismatch {
                expected: self.target_frequency,
                derived: sysclk,
            });
        }

        let pll = match self.source {
            ClockSource::Pll => Some(sysclk),
            _ => None,
        };
        let clocks = Clocks::derive(sysclk, self.ahb_prescaler, self.apb_prescaler, pll);
        if clocks.hclk > HCLK_MAX {
            return Err(ConfigError::FrequencyTooHigh(ClockDomain::Hclk));
        }
        if clocks.pclk > PCLK_MAX {
            return Err(ConfigError::FrequencyTooHigh(ClockDomain::Pclk));
        }

        Ok(ClockPlan {
            config: *self,
            clocks,
            timing: FlashTiming::for_frequency(sysclk, self.prefetch),
        })
    }
}

fn check_hse(device: &Device, oscillator: Oscillator) -> Result<(), ConfigError> {
    if oscillator == Oscillator::Hse
        && (device.hse < HSE_MIN_FREQUENCY || device.hse > HSE_MAX_FREQUENCY)
    {
        return Err(ConfigError::HseOutOfRange(device.hse));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{AhbPrescaler, ApbPrescaler, PllConfig, PllMul, PllSource, PreDiv};
    use crate::device::DeviceFamily;
    use proptest::prelude::*;

    fn f0x0() -> Device {
        Device::new(DeviceFamily::F03xF05x)
    }

    fn f0x2() -> Device {
        Device::new(DeviceFamily::F04xF07xF09x)
    }

    fn pll(source: PllSource, mul: u8) -> PllConfig {
        PllConfig::new(source, PllMul::new(mul).unwrap())
    }

    #[test]
    fn test_reset_configuration_is_valid() {
        let plan = ClockTreeConfig::hsi_8mhz().validate(&f0x0()).unwrap();
        assert_eq!(plan.clocks().sysclk, Hertz::mhz(8));
        assert_eq!(plan.timing(), FlashTiming { wait_states: 0, prefetch: true });
        assert_eq!(plan.required_oscillator(), Some(Oscillator::Hsi));
    }

    #[test]
    fn test_pll_48mhz_needs_one_wait_state() {
        let plan = ClockTreeConfig::hsi_pll_48mhz().validate(&f0x0()).unwrap();
        assert_eq!(plan.clocks().pll, Some(Hertz::mhz(48)));
        assert_eq!(plan.timing().wait_states, 1);
        assert_eq!(plan.required_oscillator(), Some(Oscillator::Hsi));

        let plan = ClockTreeConfig::hse_pll_48mhz().validate(&f0x0()).unwrap();
        assert_eq!(plan.required_oscillator(), Some(Oscillator::Hse));
    }

    #[test]
    fn test_pll_without_settings_rejected() {
        let config = ClockTreeConfig::new(ClockSource::Pll, Hertz::mhz(48));
        assert_eq!(config.validate(&f0x0()), Err(ConfigError::MissingPll));
    }

    #[test]
    fn test_stray_pll_settings_rejected() {
        let mut config = ClockTreeConfig::hsi_8mhz();
        config.pll = Some(pll(PllSource::HsiDiv2, 4));
        assert_eq!(config.validate(&f0x0()), Err(ConfigError::PllNotUsed));
    }

    #[test]
    fn test_overclocked_pll_rejected() {
        // HSI/2 × 16 = 64 MHz
        let config = ClockTreeConfig::pll(pll(PllSource::HsiDiv2, 16), Hertz::mhz(64));
        assert_eq!(
            config.validate(&f0x0()),
            Err(ConfigError::FrequencyTooHigh(ClockDomain::Pll))
        );
    }

    #[test]
    fn test_target_must_match_derivation() {
        let config = ClockTreeConfig::pll(pll(PllSource::HsiDiv2, 6), Hertz::mhz(48));
        assert_eq!(
            config.validate(&f0x0()),
            Err(ConfigError::FrequencyMismatch {
                expected: Hertz::mhz(48),
                derived: Hertz::mhz(24),
            })
        );
    }

    #[test]
    fn test_family_gates_sources() {
        assert_eq!(
            ClockTreeConfig::hsi48_48mhz().validate(&f0x0()),
            Err(ConfigError::UnsupportedSource(ClockSource::Hsi48))
        );
        assert!(ClockTreeConfig::hsi48_48mhz().validate(&f0x2()).is_ok());

        let config = ClockTreeConfig::pll(pll(PllSource::HsiPrediv, 6), Hertz::mhz(48));
        assert_eq!(config.validate(&f0x0()), Err(ConfigError::UnsupportedPllSource));
        assert!(config.validate(&f0x2()).is_ok());

        let config = ClockTreeConfig::hsi_8mhz().with_mco(McoSource::Hsi48);
        assert_eq!(config.validate(&f0x0()), Err(ConfigError::McoUnsupported));
    }

    #[test]
    fn test_hsi48_through_prediv() {
        let config = ClockTreeConfig::pll(
            pll(PllSource::Hsi48Prediv, 2).with_prediv(PreDiv::new(2).unwrap()),
            Hertz::mhz(48),
        );
        let plan = config.validate(&f0x2()).unwrap();
        assert_eq!(plan.required_oscillator(), Some(Oscillator::Hsi48));
    }

    #[test]
    fn test_hse_range_checked_only_when_used() {
        let device = f0x0().with_hse(Hertz::mhz(40));
        assert_eq!(
            ClockTreeConfig::hse_pll_48mhz().validate(&device),
            Err(ConfigError::HseOutOfRange(Hertz::mhz(40)))
        );
        assert!(ClockTreeConfig::hsi_8mhz().validate(&device).is_ok());
    }

    #[test]
    fn test_bus_clocks_follow_prescalers() {
        let config = ClockTreeConfig::hsi_pll_48mhz()
            .with_ahb_prescaler(AhbPrescaler::Div2)
            .with_apb_prescaler(ApbPrescaler::Div2);
        let clocks = config.validate(&f0x0()).unwrap().clocks();
        assert_eq!(clocks.hclk, Hertz::mhz(24));
        assert_eq!(clocks.pclk, Hertz::mhz(12));
    }

    proptest! {
        #[test]
        fn accepted_plans_respect_ratings(
            mul in 2u8..=16,
            prediv in 1u8..=16,
            hse_mhz in 4u32..=32,
            ahb in 0usize..9,
            apb in 0usize..5,
        ) {
            const AHB: [u32; 9] = [1, 2, 4, 8, 16, 64, 128, 256, 512];
            let device = f0x2().with_hse(Hertz::mhz(hse_mhz));
            let pll = pll(PllSource::HsePrediv, mul).with_prediv(PreDiv::new(prediv).unwrap());
            let derived = (Hertz::mhz(hse_mhz) / u32::from(prediv)).to_hz() * u32::from(mul);
            let config = ClockTreeConfig::pll(pll, Hertz(derived))
                .with_ahb_prescaler(AhbPrescaler::from_divisor(AHB[ahb]).unwrap())
                .with_apb_prescaler(ApbPrescaler::from_divisor(1 << apb).unwrap());

            match config.validate(&device) {
                Ok(plan) => {
                    let clocks = plan.clocks();
                    prop_assert!(clocks.sysclk <= SYSCLK_MAX);
                    prop_assert!(clocks.hclk <= clocks.sysclk);
                    prop_assert!(clocks.pclk <= clocks.hclk);
                    prop_assert!(plan.timing().supports(clocks.sysclk));
                }
                Err(err) => {
                    prop_assert_eq!(err, ConfigError::FrequencyTooHigh(ClockDomain::Pll));
                    prop_assert!(derived > SYSCLK_MAX.to_hz());
                }
            }
        }
    }
}
