//! Flash program/erase engine
//!
//! Every operation follows the same sequence: refuse to start unless the
//! controller is idle with no latched error, unlock with the key sequence,
//! select the operation mode, start it, wait for BSY to clear, check EOP,
//! clear the mode bit and EOP, and lock again whatever the outcome.
//!
//! Error flags stay latched after a failed operation, so the next operation
//! fails fast with the same classification until [`FlashEngine::clear_errors`]
//! is called.

use metronome_hal::{FlashError, Poll, RegisterBank};

use crate::chip::Chip;
use crate::registers::flash;

/// Controller state as seen before starting an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashStatus {
    /// Idle, no error latched
    Ready,
    /// An operation is in progress
    Busy,
    /// An error flag is latched
    Error(FlashError),
}

impl FlashStatus {
    /// `Ok` only when ready
    pub fn into_result(self) -> Result<(), FlashError> {
        match self {
            FlashStatus::Ready => Ok(()),
            FlashStatus::Busy => Err(FlashError::OperationBusy),
            FlashStatus::Error(err) => Err(err),
        }
    }
}

/// Read protection level from the option bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadProtection {
    /// No protection
    Level0,
    /// Debug access to flash blocked
    Level1,
    /// Debug disabled permanently
    Level2,
}

/// Flash program/erase engine
pub struct FlashEngine<'a, B: ?Sized, P> {
    chip: Chip<'a, B, P>,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> FlashEngine<'a, B, P> {
    pub fn new(chip: Chip<'a, B, P>) -> Self {
        Self { chip }
    }

    /// Flash erase granularity of the device
    pub fn page_size(&self) -> u32 {
        self.chip.device().page_size
    }

    /// Classify the controller state
    pub fn status(&self) -> FlashStatus {
        let regs = self.chip.regs();
        let sr = regs.read(flash::SR);
        if sr & flash::SR_BSY != 0 {
            FlashStatus::Busy
        } else if sr & flash::SR_PGERR != 0 {
            FlashStatus::Error(FlashError::ProgramError)
        } else if sr & flash::SR_WRPRTERR != 0 {
            FlashStatus::Error(FlashError::WriteProtectError)
        } else if regs.is_set(flash::OBR, flash::OBR_OPTERR) {
            FlashStatus::Error(FlashError::OptionByteError)
        } else {
            FlashStatus::Ready
        }
    }

    /// Check whether the control register is locked
    pub fn is_locked(&self) -> bool {
        self.chip.regs().is_set(flash::CR, flash::CR_LOCK)
    }

    /// Unlock the control register with the key sequence
    ///
    /// Writing the keys to an unlocked controller faults it until reset, so
    /// nothing is written when it is already unlocked.
    pub fn unlock(&self) {
        if self.is_locked() {
            let regs = self.chip.regs();
            regs.write(flash::KEYR, flash::KEY1);
            regs.write(flash::KEYR, flash::KEY2);
        }
    }

    /// Lock the control register and revoke option byte write access
    pub fn lock(&self) {
        self.chip
            .regs()
            .modify(flash::CR, |v| (v | flash::CR_LOCK) & !flash::CR_OPTWRE);
    }

    /// Clear latched error and end-of-operation flags
    pub fn clear_errors(&self) {
        self.chip.regs().write(flash::SR, flash::SR_FLAGS);
    }

    /// Erase the page containing `address`
    pub fn erase_page(&self, address: u32) -> Result<(), FlashError> {
        self.locked_operation(|| {
            self.run(flash::CR_PER, |regs| {
                regs.write(flash::AR, address);
                regs.set_bits(flash::CR, flash::CR_STRT);
            })
        })
    }

    /// Erase all of main flash
    pub fn mass_erase(&self) -> Result<(), FlashError> {
        self.locked_operation(|| {
            self.run(flash::CR_MER, |regs| regs.set_bits(flash::CR, flash::CR_STRT))
        })
    }

    /// Program one half-word at an even address
    pub fn program_half_word(&self, address: u32, value: u16) -> Result<(), FlashError> {
        if address % 2 != 0 {
            return Err(FlashError::Unaligned);
        }
        self.locked_operation(|| self.program(address, value))
    }

    /// Program a word as two half-words, low half first
    pub fn program_word(&self, address: u32, value: u32) -> Result<(), FlashError> {
        if address % 4 != 0 {
            return Err(FlashError::Unaligned);
        }
        self.locked_operation(|| {
            self.program(address, value as u16)?;
            self.program(address + 2, (value >> 16) as u16)
        })
    }

    /// Program a little-endian byte slice, one unlock for the whole slice
    ///
    /// Both `address` and the slice length must be even.
    pub fn program_bytes(&self, address: u32, bytes: &[u8]) -> Result<(), FlashError> {
        if address % 2 != 0 || bytes.len() % 2 != 0 {
            return Err(FlashError::Unaligned);
        }
        self.locked_operation(|| {
            for (chunk, half_address) in bytes.chunks_exact(2).zip((address..).step_by(2)) {
                self.program(half_address, u16::from_le_bytes([chunk[0], chunk[1]]))?;
            }
            Ok(())
        })
    }

    /// Read one half-word of flash memory
    pub fn read_half_word(&self, address: u32) -> u16 {
        self.chip.regs().read_half(address)
    }

    /// Unlock the controller and enable option byte writes
    ///
    /// Fails with [`FlashError::OptionByteError`] if the hardware refuses the
    /// option key sequence. Call [`FlashEngine::lock`] when done.
    pub fn unlock_option_bytes(&self) -> Result<(), FlashError> {
        self.status().into_result()?;
        self.unlock();

        let regs = self.chip.regs();
        regs.write(flash::OPTKEYR, flash::OPTKEY1);
        regs.write(flash::OPTKEYR, flash::OPTKEY2);
        if regs.is_set(flash::CR, flash::CR_OPTWRE) {
            Ok(())
        } else {
            self.lock();
            Err(FlashError::OptionByteError)
        }
    }

    /// Read protection level loaded from the option bytes
    pub fn read_protection(&self) -> ReadProtection {
        match flash::OBR_RDPRT.read(self.chip.regs().read(flash::OBR)) {
            0b00 => ReadProtection::Level0,
            0b11 => ReadProtection::Level2,
            _ => ReadProtection::Level1,
        }
    }

    /// Check readiness, unlock, run `operation`, lock
    fn locked_operation(
        &self,
        operation: impl FnOnce() -> Result<(), FlashError>,
    ) -> Result<(), FlashError> {
        self.status().into_result()?;
        self.unlock();
        let result = operation();
        self.lock();

        #[cfg(feature = "defmt")]
        if let Err(err) = result {
            defmt::warn!("flash operation failed: {}", err);
        }

        result
    }

    fn program(&self, address: u32, value: u16) -> Result<(), FlashError> {
        self.run(flash::CR_PG, |regs| regs.write_half(address, value))
    }

    /// Select `mode`, start the operation, wait, and check the outcome
    fn run(&self, mode: u32, start: impl FnOnce(&B)) -> Result<(), FlashError> {
        let regs = self.chip.regs();
        regs.set_bits(flash::CR, mode);
        start(regs);
        self.chip.wait_clear(flash::SR, flash::SR_BSY);

        let sr = regs.read(flash::SR);
        regs.clear_bits(flash::CR, mode);
        if sr & flash::SR_EOP != 0 {
            regs.write(flash::SR, flash::SR_EOP);
            return Ok(());
        }
        match self.status() {
            FlashStatus::Error(err) => Err(err),
            _ => Err(FlashError::ProgramError),
        }
    }
}
