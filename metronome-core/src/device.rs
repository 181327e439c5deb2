//! Device family capabilities
//!
//! The STM32F0 line splits into two register-incompatible groups as far as
//! the clock tree is concerned. The family is resolved once, when the
//! drivers are constructed, and threaded through every decision that
//! depends on it.

use metronome_hal::Hertz;

use crate::config::Oscillator;

/// Internal RC oscillator frequency
pub const HSI_FREQUENCY: Hertz = Hertz::mhz(8);

/// Internal 48 MHz RC oscillator frequency
pub const HSI48_FREQUENCY: Hertz = Hertz::mhz(48);

/// Crystal frequency assumed when the board does not say otherwise
pub const HSE_DEFAULT_FREQUENCY: Hertz = Hertz::mhz(8);

/// Lowest supported external crystal
pub const HSE_MIN_FREQUENCY: Hertz = Hertz::mhz(4);

/// Highest supported external crystal
pub const HSE_MAX_FREQUENCY: Hertz = Hertz::mhz(32);

/// Maximum system clock rating
pub const SYSCLK_MAX: Hertz = Hertz::mhz(48);

/// Maximum AHB clock rating
pub const HCLK_MAX: Hertz = Hertz::mhz(48);

/// Maximum APB clock rating
pub const PCLK_MAX: Hertz = Hertz::mhz(48);

/// STM32F0 device family, as far as the clock tree is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceFamily {
    /// STM32F03x / STM32F05x: one-bit PLL source selector, no HSI48
    F03xF05x,
    /// STM32F04x / STM32F07x / STM32F09x: two-bit PLL source selector,
    /// HSI48, USB and (on the larger parts) a second DMA controller
    F04xF07xF09x,
}

impl DeviceFamily {
    /// Resolve the family from the DBGMCU_IDCODE device identifier
    pub fn from_dev_id(dev_id: u16) -> Option<Self> {
        match dev_id {
            0x440 | 0x444 => Some(DeviceFamily::F03xF05x),
            0x442 | 0x445 | 0x448 => Some(DeviceFamily::F04xF07xF09x),
            _ => None,
        }
    }

    /// Whether the internal 48 MHz oscillator exists
    pub fn has_hsi48(self) -> bool {
        matches!(self, DeviceFamily::F04xF07xF09x)
    }

    /// Whether the USB peripheral exists
    pub fn has_usb(self) -> bool {
        matches!(self, DeviceFamily::F04xF07xF09x)
    }

    /// Whether the second DMA controller exists
    pub fn has_dma2(self) -> bool {
        matches!(self, DeviceFamily::F04xF07xF09x)
    }

    /// Width of the PLL source selector in CFGR
    pub fn pll_source_width(self) -> u8 {
        match self {
            DeviceFamily::F03xF05x => 1,
            DeviceFamily::F04xF07xF09x => 2,
        }
    }

    /// Default flash page size for the family
    pub fn default_page_size(self) -> u32 {
        match self {
            DeviceFamily::F03xF05x => 1024,
            DeviceFamily::F04xF07xF09x => 2048,
        }
    }
}

/// Everything the drivers need to know about the part they run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Device {
    /// Register layout family
    pub family: DeviceFamily,
    /// Frequency of the external crystal (or bypass clock) on this board
    pub hse: Hertz,
    /// Flash erase granularity in bytes
    pub page_size: u32,
}

impl Device {
    /// Device with the family's defaults and an 8 MHz crystal
    pub fn new(family: DeviceFamily) -> Self {
        Self {
            family,
            hse: HSE_DEFAULT_FREQUENCY,
            page_size: family.default_page_size(),
        }
    }

    /// Identify the device from its DBGMCU_IDCODE device identifier
    pub fn from_dev_id(dev_id: u16) -> Option<Self> {
        let family = DeviceFamily::from_dev_id(dev_id)?;
        let page_size = match dev_id {
            0x442 | 0x448 => 2048,
            _ => 1024,
        };
        Some(Self::new(family).with_page_size(page_size))
    }

    /// Set the external crystal frequency
    pub fn with_hse(mut self, hse: Hertz) -> Self {
        self.hse = hse;
        self
    }

    /// Override the flash page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Nominal output of an oscillator on this board
    pub fn oscillator_frequency(&self, oscillator: Oscillator) -> Hertz {
        match oscillator {
            Oscillator::Hsi => HSI_FREQUENCY,
            Oscillator::Hse => self.hse,
            Oscillator::Hsi48 => HSI48_FREQUENCY,
        }
    }

    /// Whether this part has the given oscillator
    pub fn has_oscillator(&self, oscillator: Oscillator) -> bool {
        oscillator != Oscillator::Hsi48 || self.family.has_hsi48()
    }
}
