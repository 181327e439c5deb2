//! Shared hardware handle

use metronome_core::Device;
use metronome_hal::{Poll, RegisterBank, Spin};

use crate::registers::dbgmcu;

/// Register bank, wait strategy and device description, handed to every
/// driver constructor
pub struct Chip<'a, B: ?Sized, P = Spin> {
    regs: &'a B,
    poll: P,
    device: Device,
}

impl<B: ?Sized, P: Copy> Clone for Chip<'_, B, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ?Sized, P: Copy> Copy for Chip<'_, B, P> {}

impl<'a, B: RegisterBank + ?Sized> Chip<'a, B, Spin> {
    /// Handle for a known device, spinning on hardware flags
    pub fn new(regs: &'a B, device: Device) -> Self {
        Self {
            regs,
            poll: Spin,
            device,
        }
    }

    /// Identify the device from DBGMCU_IDCODE
    ///
    /// Returns `None` for device identifiers outside the STM32F0 line.
    pub fn identify(regs: &'a B) -> Option<Self> {
        let dev_id = dbgmcu::IDCODE_DEV_ID.read(regs.read(dbgmcu::IDCODE)) as u16;
        let device = Device::from_dev_id(dev_id)?;

        #[cfg(feature = "defmt")]
        defmt::info!("identified device 0x{:03x} as {}", dev_id, device.family);

        Some(Self::new(regs, device))
    }
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> Chip<'a, B, P> {
    /// Replace the wait strategy
    pub fn with_poll<Q: Poll>(self, poll: Q) -> Chip<'a, B, Q> {
        Chip {
            regs: self.regs,
            poll,
            device: self.device,
        }
    }

    /// Replace the device description (e.g. to set the board's crystal)
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Register bank
    pub fn regs(&self) -> &'a B {
        self.regs
    }

    /// Wait strategy
    pub fn poll(&self) -> P {
        self.poll
    }

    /// Device description
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Wait until every bit in `mask` is set
    pub(crate) fn wait_set(&self, address: u32, mask: u32) {
        let regs = self.regs;
        self.poll.until(|| regs.is_set(address, mask));
    }

    /// Wait until every bit in `mask` is clear
    pub(crate) fn wait_clear(&self, address: u32, mask: u32) {
        let regs = self.regs;
        self.poll.until(|| regs.read(address) & mask == 0);
    }
}
