//! Volatile memory-mapped register access

use metronome_hal::RegisterBank;

/// The chip's own peripheral bus
///
/// Zero-sized; every access is a volatile read or write at the absolute
/// address given.
#[derive(Debug)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Access the memory-mapped registers
    ///
    /// # Safety
    ///
    /// Only one `Mmio` may drive the RCC and FLASH peripherals at a time, and
    /// it must only be used on an STM32F0 where the register map applies.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterBank for Mmio {
    fn read(&self, address: u32) -> u32 {
        // SAFETY: addresses come from the RM0091 register map, which is
        // word-aligned and always mapped on the target.
        unsafe { core::ptr::read_volatile(address as usize as *const u32) }
    }

    fn write(&self, address: u32, value: u32) {
        // SAFETY: see `read`.
        unsafe { core::ptr::write_volatile(address as usize as *mut u32, value) }
    }

    fn read_half(&self, address: u32) -> u16 {
        // SAFETY: half-word aligned flash or register address; callers
        // reject odd addresses before reaching the bus.
        unsafe { core::ptr::read_volatile(address as usize as *const u16) }
    }

    fn write_half(&self, address: u32, value: u16) {
        // SAFETY: see `read_half`. Flash memory is only written with PG set.
        unsafe { core::ptr::write_volatile(address as usize as *mut u16, value) }
    }
}
