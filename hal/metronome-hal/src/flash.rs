//! Flash operation errors
//!
//! Program and erase sequences report a synchronous result. Every variant is
//! locally recoverable: the caller may clear the status flags and retry.
//! A hardware hang (busy flag never clearing) is not reportable.

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};

/// Errors from flash program/erase operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Another operation is in flight (busy flag set)
    OperationBusy,
    /// Target was not erased before programming
    ProgramError,
    /// Target lies in a write-protected page
    WriteProtectError,
    /// Option bytes failed to load (byte and complement mismatch)
    OptionByteError,
    /// Address is not aligned to the programming granularity
    Unaligned,
    /// Address lies outside the flash region
    OutOfBounds,
}

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            FlashError::Unaligned => NorFlashErrorKind::NotAligned,
            FlashError::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            _ => NorFlashErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nor_flash_error_kind() {
        assert!(matches!(FlashError::Unaligned.kind(), NorFlashErrorKind::NotAligned));
        assert!(matches!(FlashError::OutOfBounds.kind(), NorFlashErrorKind::OutOfBounds));
        assert!(matches!(FlashError::ProgramError.kind(), NorFlashErrorKind::Other));
    }
}
