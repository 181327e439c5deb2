//! `embedded-storage` NOR flash interface over a region of main flash
//!
//! Offsets are relative to the start of the region. Erase works in whole
//! pages and writes in half-words, matching the controller.

use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};
use metronome_hal::{FlashError, Poll, RegisterBank};

use super::engine::FlashEngine;
use crate::chip::Chip;
use crate::registers::flash;

/// A page-aligned window of main flash, `PAGE_SIZE` must match the device
pub struct FlashRegion<'a, B: ?Sized, P, const PAGE_SIZE: usize = 1024> {
    engine: FlashEngine<'a, B, P>,
    start: u32,
    len: u32,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll, const PAGE_SIZE: usize>
    FlashRegion<'a, B, P, PAGE_SIZE>
{
    /// Region of `len` bytes starting at absolute address `start`
    ///
    /// Fails with [`FlashError::Unaligned`] if the region is not made of
    /// whole pages or `PAGE_SIZE` differs from the device's page size, and
    /// with [`FlashError::OutOfBounds`] if it leaves main flash.
    pub fn new(chip: Chip<'a, B, P>, start: u32, len: u32) -> Result<Self, FlashError> {
        let page = PAGE_SIZE as u32;
        if chip.device().page_size != page || start % page != 0 || len % page != 0 {
            return Err(FlashError::Unaligned);
        }
        let end = start.checked_add(len).ok_or(FlashError::OutOfBounds)?;
        if start < flash::MEMORY_BASE || end > flash::MEMORY_BASE + flash::MEMORY_MAX_SIZE {
            return Err(FlashError::OutOfBounds);
        }
        Ok(Self {
            engine: FlashEngine::new(chip),
            start,
            len,
        })
    }

    /// Absolute address of the first byte
    pub fn start(&self) -> u32 {
        self.start
    }

    /// The engine driving this region
    pub fn engine(&self) -> &FlashEngine<'a, B, P> {
        &self.engine
    }
}

fn map_kind(kind: NorFlashErrorKind) -> FlashError {
    match kind {
        NorFlashErrorKind::NotAligned => FlashError::Unaligned,
        NorFlashErrorKind::OutOfBounds => FlashError::OutOfBounds,
        _ => FlashError::ProgramError,
    }
}

impl<B: RegisterBank + ?Sized, P: Poll, const PAGE_SIZE: usize> ErrorType
    for FlashRegion<'_, B, P, PAGE_SIZE>
{
    type Error = FlashError;
}

impl<B: RegisterBank + ?Sized, P: Poll, const PAGE_SIZE: usize> ReadNorFlash
    for FlashRegion<'_, B, P, PAGE_SIZE>
{
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(&*self, offset, bytes.len()).map_err(map_kind)?;
        for (address, byte) in (self.start + offset..).zip(bytes.iter_mut()) {
            let half = self.engine.read_half_word(address & !1).to_le_bytes();
            *byte = half[(address & 1) as usize];
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.len as usize
    }
}

impl<B: RegisterBank + ?Sized, P: Poll, const PAGE_SIZE: usize> NorFlash
    for FlashRegion<'_, B, P, PAGE_SIZE>
{
    const WRITE_SIZE: usize = 2;
    const ERASE_SIZE: usize = PAGE_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(&*self, from, to).map_err(map_kind)?;
        for page in (from..to).step_by(PAGE_SIZE) {
            self.engine.erase_page(self.start + page)?;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(&*self, offset, bytes.len()).map_err(map_kind)?;
        self.engine.program_bytes(self.start + offset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use metronome_hal::Bounded;

    const START: u32 = 0x0800_C000;

    fn region(sim: &SimChip) -> FlashRegion<'_, SimChip, Bounded, 1024> {
        FlashRegion::new(
            Chip::new(sim, sim.device()).with_poll(Bounded::new(1_000)),
            START,
            4 * 1024,
        )
        .unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let sim = SimChip::f051();
        let mut region = region(&sim);
        region.write(10, &[0xAA, 0xBB, 0xCC, 0xDD]).unwrap();

        let mut buf = [0u8; 6];
        region.read(9, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xAA, 0xBB, 0xCC, 0xDD, 0xFF]);
        assert_eq!(sim.read_half(START + 10), 0xBBAA);
    }

    #[test]
    fn test_erase_pages() {
        let sim = SimChip::f051();
        sim.poke_half(START, 0);
        sim.poke_half(START + 1024, 0);
        sim.poke_half(START + 2048, 0);
        let mut region = region(&sim);
        region.erase(0, 2048).unwrap();

        assert_eq!(sim.read_half(START), 0xFFFF);
        assert_eq!(sim.read_half(START + 1024), 0xFFFF);
        assert_eq!(sim.read_half(START + 2048), 0);
    }

    #[test]
    fn test_bounds_and_alignment() {
        let sim = SimChip::f051();
        let mut region = region(&sim);
        assert_eq!(region.capacity(), 4096);
        assert_eq!(region.write(1, &[0, 0]), Err(FlashError::Unaligned));
        assert_eq!(region.write(4094, &[0, 0, 0, 0]), Err(FlashError::OutOfBounds));
        assert_eq!(region.erase(0, 1000), Err(FlashError::Unaligned));
        let mut buf = [0u8; 2];
        assert_eq!(region.read(4095, &mut buf), Err(FlashError::OutOfBounds));
    }

    #[test]
    fn test_page_size_must_match_device() {
        let sim = SimChip::f072();
        let chip = Chip::new(&sim, sim.device());
        assert!(FlashRegion::<_, _, 1024>::new(chip, START, 4096).is_err());
        assert!(FlashRegion::<_, _, 2048>::new(chip, START, 4096).is_ok());
        assert_eq!(
            FlashRegion::<_, _, 2048>::new(chip, 0x0804_0000, 2048).err(),
            Some(FlashError::OutOfBounds)
        );
    }
}
