//! STM32F0 register map (RM0091)
//!
//! Only the registers the clock tree and the flash engine touch are listed.
//! Addresses are absolute bus addresses.

use metronome_hal::Field;

/// Reset and clock control
pub mod rcc {
    use super::Field;

    pub const BASE: u32 = 0x4002_1000;

    /// Clock control register
    pub const CR: u32 = BASE + 0x00;
    /// Clock configuration register
    pub const CFGR: u32 = BASE + 0x04;
    /// AHB peripheral clock enable register
    pub const AHBENR: u32 = BASE + 0x14;
    /// APB2 peripheral clock enable register
    pub const APB2ENR: u32 = BASE + 0x18;
    /// APB1 peripheral clock enable register
    pub const APB1ENR: u32 = BASE + 0x1C;
    /// Clock configuration register 2
    pub const CFGR2: u32 = BASE + 0x2C;
    /// Clock control register 2
    pub const CR2: u32 = BASE + 0x34;

    // CR
    pub const CR_HSION: u32 = 1 << 0;
    pub const CR_HSIRDY: u32 = 1 << 1;
    pub const CR_HSEON: u32 = 1 << 16;
    pub const CR_HSERDY: u32 = 1 << 17;
    pub const CR_HSEBYP: u32 = 1 << 18;
    pub const CR_CSSON: u32 = 1 << 19;
    pub const CR_PLLON: u32 = 1 << 24;
    pub const CR_PLLRDY: u32 = 1 << 25;

    // CR2
    pub const CR2_HSI48ON: u32 = 1 << 16;
    pub const CR2_HSI48RDY: u32 = 1 << 17;

    // CFGR
    pub const CFGR_SW: Field = Field::new(0, 2);
    pub const CFGR_SWS: Field = Field::new(2, 2);
    pub const CFGR_HPRE: Field = Field::new(4, 4);
    pub const CFGR_PPRE: Field = Field::new(8, 3);
    /// Two-bit PLL source selector (F04x/F07x/F09x)
    pub const CFGR_PLLSRC_WIDE: Field = Field::new(15, 2);
    /// One-bit PLL source selector (F03x/F05x)
    pub const CFGR_PLLSRC_NARROW: Field = Field::new(16, 1);
    pub const CFGR_PLLMUL: Field = Field::new(18, 4);
    pub const CFGR_MCO: Field = Field::new(24, 4);

    // CFGR2
    pub const CFGR2_PREDIV: Field = Field::new(0, 4);

    // SW / SWS encodings
    pub const SW_HSI: u32 = 0b00;
    pub const SW_HSE: u32 = 0b01;
    pub const SW_PLL: u32 = 0b10;
    pub const SW_HSI48: u32 = 0b11;
}

/// Embedded flash interface
pub mod flash {
    use super::Field;

    pub const BASE: u32 = 0x4002_2000;

    /// Access control register
    pub const ACR: u32 = BASE + 0x00;
    /// Key register
    pub const KEYR: u32 = BASE + 0x04;
    /// Option byte key register
    pub const OPTKEYR: u32 = BASE + 0x08;
    /// Status register
    pub const SR: u32 = BASE + 0x0C;
    /// Control register
    pub const CR: u32 = BASE + 0x10;
    /// Address register
    pub const AR: u32 = BASE + 0x14;
    /// Option byte register
    pub const OBR: u32 = BASE + 0x1C;
    /// Write protection register
    pub const WRPR: u32 = BASE + 0x20;

    // ACR
    pub const ACR_LATENCY: Field = Field::new(0, 3);
    pub const ACR_PRFTBE: u32 = 1 << 4;
    pub const ACR_PRFTBS: u32 = 1 << 5;
    pub const ACR_RESET: u32 = ACR_PRFTBE | ACR_PRFTBS;

    // KEYR / OPTKEYR unlock sequences
    pub const KEY1: u32 = 0x4567_0123;
    pub const KEY2: u32 = 0xCDEF_89AB;
    pub const OPTKEY1: u32 = 0x0819_2A3B;
    pub const OPTKEY2: u32 = 0x4C5D_6E7F;

    // SR
    pub const SR_BSY: u32 = 1 << 0;
    pub const SR_PGERR: u32 = 1 << 2;
    pub const SR_WRPRTERR: u32 = 1 << 4;
    pub const SR_EOP: u32 = 1 << 5;
    /// Flags cleared by writing 1
    pub const SR_FLAGS: u32 = SR_PGERR | SR_WRPRTERR | SR_EOP;

    // CR
    pub const CR_PG: u32 = 1 << 0;
    pub const CR_PER: u32 = 1 << 1;
    pub const CR_MER: u32 = 1 << 2;
    pub const CR_OPTPG: u32 = 1 << 4;
    pub const CR_OPTER: u32 = 1 << 5;
    pub const CR_STRT: u32 = 1 << 6;
    pub const CR_LOCK: u32 = 1 << 7;
    pub const CR_OPTWRE: u32 = 1 << 9;

    // OBR
    pub const OBR_OPTERR: u32 = 1 << 0;
    pub const OBR_RDPRT: Field = Field::new(1, 2);

    /// Start of main flash memory
    pub const MEMORY_BASE: u32 = 0x0800_0000;
    /// Largest main flash across the family (256 KiB on F09x)
    pub const MEMORY_MAX_SIZE: u32 = 256 * 1024;
}

/// Debug support, used for device identification
pub mod dbgmcu {
    use super::Field;

    /// Device identity code
    pub const IDCODE: u32 = 0x4001_5800;
    pub const IDCODE_DEV_ID: Field = Field::new(0, 12);
}
