//! Register space abstractions
//!
//! Every driver in the workspace reaches the hardware through a
//! [`RegisterBank`]. On the chip this is volatile memory-mapped I/O; in tests
//! it is a simulated bank that models the peripheral's side effects.

/// A 32-bit register space addressed by absolute bus address
///
/// Methods take `&self`: the bank models hardware registers, which are
/// mutated through shared references exactly like volatile cells.
pub trait RegisterBank {
    /// Read a 32-bit register
    fn read(&self, address: u32) -> u32;

    /// Write a 32-bit register
    fn write(&self, address: u32, value: u32);

    /// Read a half-word (used for flash memory contents)
    fn read_half(&self, address: u32) -> u16;

    /// Write a half-word (flash programming is half-word granular)
    fn write_half(&self, address: u32, value: u16);

    /// Read-modify-write a register
    fn modify(&self, address: u32, f: impl FnOnce(u32) -> u32) {
        let value = self.read(address);
        self.write(address, f(value));
    }

    /// Set the bits in `mask`, leaving the others untouched
    fn set_bits(&self, address: u32, mask: u32) {
        self.modify(address, |v| v | mask);
    }

    /// Clear the bits in `mask`, leaving the others untouched
    fn clear_bits(&self, address: u32, mask: u32) {
        self.modify(address, |v| v & !mask);
    }

    /// Check whether every bit in `mask` is set
    fn is_set(&self, address: u32, mask: u32) -> bool {
        self.read(address) & mask == mask
    }
}

impl<B: RegisterBank + ?Sized> RegisterBank for &B {
    fn read(&self, address: u32) -> u32 {
        (**self).read(address)
    }

    fn write(&self, address: u32, value: u32) {
        (**self).write(address, value)
    }

    fn read_half(&self, address: u32) -> u16 {
        (**self).read_half(address)
    }

    fn write_half(&self, address: u32, value: u16) {
        (**self).write_half(address, value)
    }
}

/// A multi-bit field inside a 32-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Field {
    offset: u8,
    width: u8,
}

impl Field {
    /// Describe a field of `width` bits starting at bit `offset`
    pub const fn new(offset: u8, width: u8) -> Self {
        Self { offset, width }
    }

    /// Bit offset of the field's least significant bit
    pub const fn offset(self) -> u8 {
        self.offset
    }

    /// Mask of the field in register position
    pub const fn mask(self) -> u32 {
        let bits = if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        bits << self.offset
    }

    /// Extract the field value from a register value
    pub const fn read(self, register: u32) -> u32 {
        (register & self.mask()) >> self.offset
    }

    /// Return `register` with the field replaced by `value`
    ///
    /// Bits of `value` that do not fit the field are discarded.
    pub const fn write(self, register: u32, value: u32) -> u32 {
        (register & !self.mask()) | ((value << self.offset) & self.mask())
    }
}
