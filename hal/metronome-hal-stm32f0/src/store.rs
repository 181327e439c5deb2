//! Clock profile persistence
//!
//! A [`ProfileStore`] keeps one [`ClockTreeConfig`] in a reserved flash
//! region as postcard binary data behind a small header:
//!
//! ```text
//! offset 0: magic   u16 LE  0x4D54
//! offset 2: version u8      1
//! offset 3: reserved u8
//! offset 4: length  u16 LE  payload bytes
//! offset 6: payload (postcard), padded to an even length
//! ```

use embedded_storage::nor_flash::NorFlash;
use metronome_core::ClockTreeConfig;
use metronome_hal::FlashError;

/// Header marker of a stored profile
pub const PROFILE_MAGIC: u16 = 0x4D54;

/// Current profile layout version
pub const PROFILE_VERSION: u8 = 1;

/// Largest serialized profile
pub const MAX_PROFILE_SIZE: usize = 128;

const HEADER_SIZE: usize = 6;

/// Profile persistence errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Flash operation failed
    Flash(FlashError),
    /// Nothing stored (erased flash)
    NotFound,
    /// Stored with a different layout version
    VersionMismatch,
    /// Header length is out of range
    Corrupt,
    /// Serialization failed (profile too large)
    Serialize,
    /// Deserialization failed
    Deserialize,
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        StoreError::Flash(e)
    }
}

/// Profile storage in a dedicated flash region
pub struct ProfileStore<F> {
    flash: F,
}

impl<F> ProfileStore<F>
where
    F: NorFlash<Error = FlashError>,
{
    /// Use `flash` (typically a [`FlashRegion`](crate::flash::FlashRegion))
    /// for profile storage
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Give back the underlying flash
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Load the stored profile
    pub fn load(&mut self) -> Result<ClockTreeConfig, StoreError> {
        let mut header = [0u8; HEADER_SIZE];
        self.flash.read(0, &mut header)?;

        let magic = u16::from_le_bytes([header[0], header[1]]);
        if magic != PROFILE_MAGIC {
            return Err(StoreError::NotFound);
        }
        if header[2] != PROFILE_VERSION {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "profile version mismatch: found {}, expected {}",
                header[2],
                PROFILE_VERSION
            );
            return Err(StoreError::VersionMismatch);
        }
        let len = usize::from(u16::from_le_bytes([header[4], header[5]]));
        if len > MAX_PROFILE_SIZE {
            return Err(StoreError::Corrupt);
        }

        let mut buffer = [0u8; MAX_PROFILE_SIZE];
        self.flash.read(HEADER_SIZE as u32, &mut buffer[..len])?;
        let config =
            postcard::from_bytes(&buffer[..len]).map_err(|_| StoreError::Deserialize)?;

        #[cfg(feature = "defmt")]
        defmt::debug!("loaded {} byte clock profile", len);

        Ok(config)
    }

    /// Replace the stored profile
    pub fn store(&mut self, config: &ClockTreeConfig) -> Result<(), StoreError> {
        let mut buffer = [0u8; HEADER_SIZE + MAX_PROFILE_SIZE];
        let len = postcard::to_slice(config, &mut buffer[HEADER_SIZE..])
            .map_err(|_| StoreError::Serialize)?
            .len();

        buffer[0..2].copy_from_slice(&PROFILE_MAGIC.to_le_bytes());
        buffer[2] = PROFILE_VERSION;
        buffer[3] = 0;
        buffer[4..6].copy_from_slice(&(len as u16).to_le_bytes());

        // Half-word programming: round up to an even length
        let padded = (HEADER_SIZE + len + 1) & !1;
        self.clear()?;
        self.flash.write(0, &buffer[..padded])?;

        #[cfg(feature = "defmt")]
        defmt::info!("stored {} byte clock profile", len);

        Ok(())
    }

    /// Erase the stored profile
    pub fn clear(&mut self) -> Result<(), StoreError> {
        let erase = F::ERASE_SIZE as u32;
        self.flash.erase(0, erase)?;
        Ok(())
    }

    /// Check whether a profile header is present
    pub fn exists(&mut self) -> bool {
        let mut magic = [0u8; 2];
        self.flash.read(0, &mut magic).is_ok() && u16::from_le_bytes(magic) == PROFILE_MAGIC
    }
}
