//! Peripheral bus clock gating
//!
//! A [`PeripheralId`] packs the bus group into the high nibble and the
//! peripheral index into the low nibble. Each id maps to one enable bit in
//! AHBENR, APB1ENR or APB2ENR.

use metronome_core::DeviceFamily;
use metronome_hal::{ClockGate, Hertz, Poll, RegisterBank};

use super::tree::ClockTree;
use crate::chip::Chip;
use crate::registers::rcc;

/// Peripheral identifier: `0xGI`, bus group `G`, index `I`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeripheralId(pub u8);

impl PeripheralId {
    pub const GPIOA: Self = Self(0x00);
    pub const GPIOB: Self = Self(0x01);
    pub const GPIOC: Self = Self(0x02);
    pub const GPIOD: Self = Self(0x03);
    pub const GPIOE: Self = Self(0x04);
    pub const GPIOF: Self = Self(0x05);
    pub const DMA1: Self = Self(0x80);
    pub const DMA2: Self = Self(0x81);
    pub const TIM1: Self = Self(0x90);
    pub const TIM2: Self = Self(0x91);
    pub const TIM3: Self = Self(0x92);
    pub const TIM14: Self = Self(0x93);
    pub const TIM15: Self = Self(0x94);
    pub const TIM16: Self = Self(0x95);
    pub const TIM17: Self = Self(0x96);
    pub const USART1: Self = Self(0xA0);
    pub const USART2: Self = Self(0xA1);
    pub const USART3: Self = Self(0xA2);
    pub const SPI1: Self = Self(0xB0);
    pub const SPI2: Self = Self(0xB1);
    pub const I2C1: Self = Self(0xC0);
    pub const I2C2: Self = Self(0xC1);
    pub const ADC: Self = Self(0xD0);
    pub const DAC: Self = Self(0xD1);
    pub const USB: Self = Self(0xE0);

    /// Bus group (high nibble)
    pub fn group(self) -> u8 {
        self.0 >> 4
    }

    /// Index within the group (low nibble)
    pub fn index(self) -> u8 {
        self.0 & 0x0F
    }
}

/// Bus a peripheral is clocked from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bus {
    Ahb,
    Apb1,
    Apb2,
}

impl Bus {
    fn enable_register(self) -> u32 {
        match self {
            Bus::Ahb => rcc::AHBENR,
            Bus::Apb1 => rcc::APB1ENR,
            Bus::Apb2 => rcc::APB2ENR,
        }
    }
}

/// Enable bit for a peripheral, `None` for ids the family does not have
pub fn route(id: PeripheralId, family: DeviceFamily) -> Option<(Bus, u8)> {
    use Bus::*;

    match id.0 {
        0x00..=0x05 => Some((Ahb, 17 + id.index())),
        0x80 => Some((Ahb, 0)),
        0x81 if family.has_dma2() => Some((Ahb, 1)),
        0x90 => Some((Apb2, 11)),
        0x91 => Some((Apb1, 0)),
        0x92 => Some((Apb1, 1)),
        0x93 => Some((Apb1, 8)),
        0x94 => Some((Apb2, 16)),
        0x95 => Some((Apb2, 17)),
        0x96 => Some((Apb2, 18)),
        0xA0 => Some((Apb2, 14)),
        0xA1 => Some((Apb1, 17)),
        0xA2 => Some((Apb1, 18)),
        0xB0 => Some((Apb2, 12)),
        0xB1 => Some((Apb1, 14)),
        0xC0 => Some((Apb1, 21)),
        0xC1 => Some((Apb1, 22)),
        0xD0 => Some((Apb2, 9)),
        0xD1 => Some((Apb1, 29)),
        0xE0 if family.has_usb() => Some((Apb1, 23)),
        _ => None,
    }
}

/// Peripheral clock gate
pub struct PeripheralGate<'a, B: ?Sized, P> {
    chip: Chip<'a, B, P>,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> PeripheralGate<'a, B, P> {
    pub fn new(chip: Chip<'a, B, P>) -> Self {
        Self { chip }
    }

    fn locate(&self, id: PeripheralId) -> Option<(u32, u32)> {
        route(id, self.chip.device().family)
            .map(|(bus, bit)| (bus.enable_register(), 1u32 << bit))
    }

    /// Frequency of the bus clock feeding a peripheral
    pub fn frequency(&self, id: PeripheralId) -> Option<Hertz> {
        let (bus, _) = route(id, self.chip.device().family)?;
        let clocks = ClockTree::new(self.chip).clocks();
        Some(match bus {
            Bus::Ahb => clocks.hclk,
            Bus::Apb1 | Bus::Apb2 => clocks.pclk,
        })
    }
}

impl<B: RegisterBank + ?Sized, P: Poll> ClockGate for PeripheralGate<'_, B, P> {
    type Id = PeripheralId;

    fn enable(&self, id: PeripheralId) {
        if let Some((register, mask)) = self.locate(id) {
            self.chip.regs().set_bits(register, mask);
        }
    }

    fn disable(&self, id: PeripheralId) {
        if let Some((register, mask)) = self.locate(id) {
            self.chip.regs().clear_bits(register, mask);
        }
    }

    fn is_enabled(&self, id: PeripheralId) -> bool {
        self.locate(id)
            .is_some_and(|(register, mask)| self.chip.regs().is_set(register, mask))
    }
}
