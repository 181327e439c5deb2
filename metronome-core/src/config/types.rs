//! Configuration type definitions

use metronome_hal::Hertz;

use crate::device::{DeviceFamily, HSI_FREQUENCY};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// System clock source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ClockSource {
    /// Internal 8 MHz RC oscillator
    #[default]
    Hsi,
    /// External crystal or bypass clock
    Hse,
    /// Phase-locked loop output
    Pll,
    /// Internal 48 MHz RC oscillator (F04x/F07x/F09x)
    Hsi48,
}

/// A clock-generating oscillator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Oscillator {
    /// Internal 8 MHz RC oscillator
    Hsi,
    /// External crystal or bypass clock
    Hse,
    /// Internal 48 MHz RC oscillator
    Hsi48,
}

impl ClockSource {
    /// The oscillator behind this source, `None` for the PLL
    pub fn oscillator(self) -> Option<Oscillator> {
        match self {
            ClockSource::Hsi => Some(Oscillator::Hsi),
            ClockSource::Hse => Some(Oscillator::Hse),
            ClockSource::Hsi48 => Some(Oscillator::Hsi48),
            ClockSource::Pll => None,
        }
    }
}

/// Lifecycle of an oscillator, decoded from its enable and ready bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OscillatorState {
    /// Enable bit clear
    Disabled,
    /// Enable bit set, hardware has not confirmed stability yet
    Starting,
    /// Enable and ready bits set
    Ready,
}

/// PLL input selection
///
/// The F03x/F05x family only has `HsiDiv2` and `HsePrediv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PllSource {
    /// HSI divided by two
    #[default]
    HsiDiv2,
    /// HSI through the PREDIV divider
    HsiPrediv,
    /// HSE through the PREDIV divider
    HsePrediv,
    /// HSI48 through the PREDIV divider
    Hsi48Prediv,
}

impl PllSource {
    /// Oscillator that must be running to feed the PLL
    pub fn oscillator(self) -> Oscillator {
        match self {
            PllSource::HsiDiv2 | PllSource::HsiPrediv => Oscillator::Hsi,
            PllSource::HsePrediv => Oscillator::Hse,
            PllSource::Hsi48Prediv => Oscillator::Hsi48,
        }
    }

    /// Whether the family's PLL source selector can express this input
    pub fn supported_on(self, family: DeviceFamily) -> bool {
        match family {
            DeviceFamily::F03xF05x => matches!(self, PllSource::HsiDiv2 | PllSource::HsePrediv),
            DeviceFamily::F04xF07xF09x => true,
        }
    }

    /// Frequency entering the PLL multiplier
    pub fn input_frequency(self, oscillator: Hertz, prediv: PreDiv) -> Hertz {
        match self {
            PllSource::HsiDiv2 => HSI_FREQUENCY / 2,
            _ => oscillator / u32::from(prediv.value()),
        }
    }
}

/// PLL multiplication factor, 2 to 16
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct PllMul(u8);

impl PllMul {
    /// Smallest multiplier
    pub const MIN: u8 = 2;
    /// Largest multiplier
    pub const MAX: u8 = 16;

    /// Multiplier, if within 2..=16
    pub const fn new(factor: u8) -> Option<Self> {
        if factor >= Self::MIN && factor <= Self::MAX {
            Some(Self(factor))
        } else {
            None
        }
    }

    /// Multiplier clamped into 2..=16
    pub const fn saturating(factor: u8) -> Self {
        if factor < Self::MIN {
            Self(Self::MIN)
        } else if factor > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(factor)
        }
    }

    /// Multiplication factor
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for PllMul {
    type Error = ConfigValueError;

    fn try_from(factor: u8) -> Result<Self, Self::Error> {
        PllMul::new(factor).ok_or(ConfigValueError)
    }
}

impl From<PllMul> for u8 {
    fn from(value: PllMul) -> Self {
        value.0
    }
}

/// PREDIV divider ahead of the PLL, 1 to 16
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct PreDiv(u8);

impl PreDiv {
    /// No division
    pub const DIV1: PreDiv = PreDiv(1);

    /// Divider, if within 1..=16
    pub const fn new(divisor: u8) -> Option<Self> {
        if divisor >= 1 && divisor <= 16 {
            Some(Self(divisor))
        } else {
            None
        }
    }

    /// Division factor
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for PreDiv {
    fn default() -> Self {
        Self::DIV1
    }
}

impl TryFrom<u8> for PreDiv {
    type Error = ConfigValueError;

    fn try_from(divisor: u8) -> Result<Self, Self::Error> {
        PreDiv::new(divisor).ok_or(ConfigValueError)
    }
}

impl From<PreDiv> for u8 {
    fn from(value: PreDiv) -> Self {
        value.0
    }
}

/// A numeric configuration value was out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigValueError;

impl core::fmt::Display for ConfigValueError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("configuration value out of range")
    }
}

/// AHB prescaler (SYSCLK to HCLK)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AhbPrescaler {
    #[default]
    Div1,
    Div2,
    Div4,
    Div8,
    Div16,
    Div64,
    Div128,
    Div256,
    Div512,
}

impl AhbPrescaler {
    /// Division factor
    pub fn divisor(self) -> u32 {
        match self {
            AhbPrescaler::Div1 => 1,
            AhbPrescaler::Div2 => 2,
            AhbPrescaler::Div4 => 4,
            AhbPrescaler::Div8 => 8,
            AhbPrescaler::Div16 => 16,
            AhbPrescaler::Div64 => 64,
            AhbPrescaler::Div128 => 128,
            AhbPrescaler::Div256 => 256,
            AhbPrescaler::Div512 => 512,
        }
    }

    /// Prescaler for a division factor (there is no /32)
    pub fn from_divisor(divisor: u32) -> Option<Self> {
        match divisor {
            1 => Some(AhbPrescaler::Div1),
            2 => Some(AhbPrescaler::Div2),
            4 => Some(AhbPrescaler::Div4),
            8 => Some(AhbPrescaler::Div8),
            16 => Some(AhbPrescaler::Div16),
            64 => Some(AhbPrescaler::Div64),
            128 => Some(AhbPrescaler::Div128),
            256 => Some(AhbPrescaler::Div256),
            512 => Some(AhbPrescaler::Div512),
            _ => None,
        }
    }
}

/// APB prescaler (HCLK to PCLK)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ApbPrescaler {
    #[default]
    Div1,
    Div2,
    Div4,
    Div8,
    Div16,
}

impl ApbPrescaler {
    /// Division factor
    pub fn divisor(self) -> u32 {
        match self {
            ApbPrescaler::Div1 => 1,
            ApbPrescaler::Div2 => 2,
            ApbPrescaler::Div4 => 4,
            ApbPrescaler::Div8 => 8,
            ApbPrescaler::Div16 => 16,
        }
    }

    /// Prescaler for a division factor
    pub fn from_divisor(divisor: u32) -> Option<Self> {
        match divisor {
            1 => Some(ApbPrescaler::Div1),
            2 => Some(ApbPrescaler::Div2),
            4 => Some(ApbPrescaler::Div4),
            8 => Some(ApbPrescaler::Div8),
            16 => Some(ApbPrescaler::Div16),
            _ => None,
        }
    }
}

/// Clock routed to the MCO output pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum McoSource {
    /// MCO output disabled
    #[default]
    Disabled,
    Hsi14,
    Lsi,
    Lse,
    Sysclk,
    Hsi,
    Hse,
    Pll,
    /// F04x/F07x/F09x only
    Hsi48,
}

/// PLL configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PllConfig {
    /// Input selection
    pub source: PllSource,
    /// Multiplication factor
    pub multiplier: PllMul,
    /// Divider ahead of the multiplier (ignored for `HsiDiv2`)
    pub prediv: PreDiv,
}

impl PllConfig {
    /// PLL fed from `source` without pre-division
    pub fn new(source: PllSource, multiplier: PllMul) -> Self {
        Self {
            source,
            multiplier,
            prediv: PreDiv::DIV1,
        }
    }

    /// Set the PREDIV divider
    pub fn with_prediv(mut self, prediv: PreDiv) -> Self {
        self.prediv = prediv;
        self
    }

    /// Output frequency for a given oscillator frequency feeding the PLL
    ///
    /// `None` if the product overflows.
    pub fn output_frequency(&self, oscillator: Hertz) -> Option<Hertz> {
        self.source
            .input_frequency(oscillator, self.prediv)
            .checked_mul(u32::from(self.multiplier.value()))
    }
}

/// Requested clock tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClockTreeConfig {
    /// System clock source
    pub source: ClockSource,
    /// PLL settings, required when `source` is the PLL
    pub pll: Option<PllConfig>,
    /// SYSCLK to HCLK divider
    pub ahb_prescaler: AhbPrescaler,
    /// HCLK to PCLK divider
    pub apb_prescaler: ApbPrescaler,
    /// Expected system clock frequency
    pub target_frequency: Hertz,
    /// Flash prefetch buffer
    pub prefetch: bool,
    /// Clock security system on the external oscillator
    pub css: bool,
    /// Drive HSE from an external clock instead of a crystal
    pub hse_bypass: bool,
    /// Clock output pin selection
    pub mco: McoSource,
}

impl ClockTreeConfig {
    /// System clock driven directly by `source`, everything else at reset values
    pub fn new(source: ClockSource, target_frequency: Hertz) -> Self {
        Self {
            source,
            pll: None,
            ahb_prescaler: AhbPrescaler::Div1,
            apb_prescaler: ApbPrescaler::Div1,
            target_frequency,
            prefetch: true,
            css: false,
            hse_bypass: false,
            mco: McoSource::Disabled,
        }
    }

    /// System clock driven by the PLL
    pub fn pll(pll: PllConfig, target_frequency: Hertz) -> Self {
        Self {
            pll: Some(pll),
            ..Self::new(ClockSource::Pll, target_frequency)
        }
    }

    /// Set the AHB prescaler
    pub fn with_ahb_prescaler(mut self, prescaler: AhbPrescaler) -> Self {
        self.ahb_prescaler = prescaler;
        self
    }

    /// Set the APB prescaler
    pub fn with_apb_prescaler(mut self, prescaler: ApbPrescaler) -> Self {
        self.apb_prescaler = prescaler;
        self
    }

    /// Enable or disable the flash prefetch buffer
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Enable or disable the clock security system
    pub fn with_css(mut self, css: bool) -> Self {
        self.css = css;
        self
    }

    /// Feed HSE from an external clock signal
    pub fn with_hse_bypass(mut self, bypass: bool) -> Self {
        self.hse_bypass = bypass;
        self
    }

    /// Route a clock to the MCO pin
    pub fn with_mco(mut self, mco: McoSource) -> Self {
        self.mco = mco;
        self
    }

    /// 8 MHz straight from the internal RC oscillator (reset configuration)
    pub fn hsi_8mhz() -> Self {
        Self::new(ClockSource::Hsi, Hertz::mhz(8))
    }

    /// 48 MHz from HSI/2 × 12, no crystal needed
    pub fn hsi_pll_48mhz() -> Self {
        let multiplier = PllMul(12);
        Self::pll(PllConfig::new(PllSource::HsiDiv2, multiplier), Hertz::mhz(48))
    }

    /// 48 MHz from an 8 MHz crystal × 6, clock security system enabled
    pub fn hse_pll_48mhz() -> Self {
        let multiplier = PllMul(6);
        Self::pll(PllConfig::new(PllSource::HsePrediv, multiplier), Hertz::mhz(48)).with_css(true)
    }

    /// 48 MHz straight from HSI48 (F04x/F07x/F09x)
    pub fn hsi48_48mhz() -> Self {
        Self::new(ClockSource::Hsi48, Hertz::mhz(48))
    }
}

impl Default for ClockTreeConfig {
    fn default() -> Self {
        Self::hsi_8mhz()
    }
}

/// Frequencies of a clock tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Clocks {
    /// System clock
    pub sysclk: Hertz,
    /// AHB bus and core clock
    pub hclk: Hertz,
    /// APB bus clock
    pub pclk: Hertz,
    /// PLL output, when the PLL is configured as the system source
    pub pll: Option<Hertz>,
}

impl Clocks {
    /// Derive bus clocks from a system clock and the prescalers
    pub fn derive(sysclk: Hertz, ahb: AhbPrescaler, apb: ApbPrescaler, pll: Option<Hertz>) -> Self {
        let hclk = sysclk / ahb.divisor();
        Self {
            sysclk,
            hclk,
            pclk: hclk / apb.divisor(),
            pll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pll_mul_bounds() {
        assert_eq!(PllMul::new(1), None);
        assert_eq!(PllMul::new(2).map(PllMul::value), Some(2));
        assert_eq!(PllMul::new(16).map(PllMul::value), Some(16));
        assert_eq!(PllMul::new(17), None);
        assert_eq!(PllMul::try_from(0), Err(ConfigValueError));
        assert_eq!(PllMul::saturating(0).value(), 2);
        assert_eq!(PllMul::saturating(20).value(), 16);
    }

    #[test]
    fn test_prediv_bounds() {
        assert_eq!(PreDiv::new(0), None);
        assert_eq!(PreDiv::new(16).map(PreDiv::value), Some(16));
        assert_eq!(PreDiv::new(17), None);
        assert_eq!(PreDiv::default(), PreDiv::DIV1);
    }

    #[test]
    fn test_hsi_div2_ignores_prediv() {
        let prediv = PreDiv::new(4).unwrap();
        assert_eq!(PllSource::HsiDiv2.input_frequency(HSI_FREQUENCY, prediv), Hertz::mhz(4));
        assert_eq!(PllSource::HsiPrediv.input_frequency(HSI_FREQUENCY, prediv), Hertz::mhz(2));
    }

    #[test]
    fn test_pll_sources_per_family() {
        assert!(PllSource::HsiDiv2.supported_on(DeviceFamily::F03xF05x));
        assert!(PllSource::HsePrediv.supported_on(DeviceFamily::F03xF05x));
        assert!(!PllSource::HsiPrediv.supported_on(DeviceFamily::F03xF05x));
        assert!(!PllSource::Hsi48Prediv.supported_on(DeviceFamily::F03xF05x));
        assert!(PllSource::Hsi48Prediv.supported_on(DeviceFamily::F04xF07xF09x));
    }

    #[test]
    fn test_presets() {
        let hse = ClockTreeConfig::hse_pll_48mhz();
        assert_eq!(hse.source, ClockSource::Pll);
        assert!(hse.css);
        assert_eq!(
            hse.pll.and_then(|p| p.output_frequency(Hertz::mhz(8))),
            Some(Hertz::mhz(48))
        );
        assert_eq!(
            ClockTreeConfig::hsi_pll_48mhz().pll.and_then(|p| p.output_frequency(HSI_FREQUENCY)),
            Some(Hertz::mhz(48))
        );
    }

    #[test]
    fn test_clock_derivation() {
        let clocks = Clocks::derive(Hertz::mhz(48), AhbPrescaler::Div2, ApbPrescaler::Div4, None);
        assert_eq!(clocks.hclk, Hertz::mhz(24));
        assert_eq!(clocks.pclk, Hertz::mhz(6));
    }

    proptest! {
        #[test]
        fn prescaler_divisors_round_trip(shift in 0u32..10) {
            let divisor = 1u32 << shift;
            if let Some(ahb) = AhbPrescaler::from_divisor(divisor) {
                prop_assert_eq!(ahb.divisor(), divisor);
            } else {
                prop_assert_eq!(divisor, 32);
            }
            if let Some(apb) = ApbPrescaler::from_divisor(divisor) {
                prop_assert_eq!(apb.divisor(), divisor);
            } else {
                prop_assert!(divisor > 16);
            }
        }

        #[test]
        fn pll_output_is_input_times_multiplier(factor in 2u8..=16, hse_mhz in 4u32..=32) {
            let mul = PllMul::new(factor).unwrap();
            let pll = PllConfig::new(PllSource::HsePrediv, mul);
            prop_assert_eq!(
                pll.output_frequency(Hertz::mhz(hse_mhz)),
                Some(Hertz::mhz(hse_mhz * u32::from(factor)))
            );
        }
    }
}
