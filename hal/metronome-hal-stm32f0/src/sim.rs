//! Simulated STM32F0 register bank
//!
//! [`SimChip`] models the side effects the drivers depend on: ready flags
//! that follow enable bits after a few polls, switch status that follows the
//! switch request once the selected source is ready, the flash key sequence,
//! page and mass erase, half-word programming with its error flags, and
//! write-1-to-clear status bits. Every register write is logged in order so
//! tests can assert sequencing.
//!
//! Failure hooks make the error paths reachable: an oscillator that never
//! starts, a flash controller stuck busy, write-protected sectors and a
//! latched option byte error.

use core::cell::{Cell, RefCell};

use heapless::{FnvIndexMap, Vec};
use metronome_core::config::Oscillator;
use metronome_core::{Device, DeviceFamily};
use metronome_hal::RegisterBank;

use crate::registers::{dbgmcu, flash, rcc};

/// Size of the simulated main flash
pub const SIM_FLASH_SIZE: u32 = 64 * 1024;

/// Main flash covered by one write protection bit
pub const SIM_WRP_SECTOR_SIZE: u32 = 4 * 1024;

/// Number of register writes retained in the log
pub const LOG_CAPACITY: usize = 512;

const HALF_WORDS: usize = (SIM_FLASH_SIZE / 2) as usize;

/// Oscillators and the PLL, in the order their counters are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Hsi,
    Hse,
    Pll,
    Hsi48,
}

impl Source {
    const ALL: [Source; 4] = [Source::Hsi, Source::Hse, Source::Pll, Source::Hsi48];

    fn index(self) -> usize {
        self as usize
    }

    /// Control register, enable bit and ready bit
    fn bits(self) -> (u32, u32, u32) {
        match self {
            Source::Hsi => (rcc::CR, rcc::CR_HSION, rcc::CR_HSIRDY),
            Source::Hse => (rcc::CR, rcc::CR_HSEON, rcc::CR_HSERDY),
            Source::Pll => (rcc::CR, rcc::CR_PLLON, rcc::CR_PLLRDY),
            Source::Hsi48 => (rcc::CR2, rcc::CR2_HSI48ON, rcc::CR2_HSI48RDY),
        }
    }

    fn from_oscillator(oscillator: Oscillator) -> Self {
        match oscillator {
            Oscillator::Hsi => Source::Hsi,
            Oscillator::Hse => Source::Hse,
            Oscillator::Hsi48 => Source::Hsi48,
        }
    }

    fn from_sw(sw: u32) -> Self {
        match sw {
            rcc::SW_HSE => Source::Hse,
            rcc::SW_PLL => Source::Pll,
            rcc::SW_HSI48 => Source::Hsi48,
            _ => Source::Hsi,
        }
    }
}

struct SimState {
    family: DeviceFamily,
    registers: FnvIndexMap<u32, u32, 32>,
    memory: [u16; HALF_WORDS],
    log: Vec<(u32, u32), LOG_CAPACITY>,

    startup_polls: u32,
    switch_polls: u32,
    busy_polls: u32,

    oscillator_pending: [Option<u32>; 4],
    oscillator_failed: [bool; 4],
    switch_pending: Option<u32>,
    pll_changed_while_on: bool,

    flash_key_stage: u8,
    flash_key_fault: bool,
    option_key_stage: u8,
    key_writes: u32,
    flash_busy: Option<u32>,
    force_busy: bool,
}

/// A simulated STM32F0 register bank
///
/// Uses interior mutability through `RefCell`, so a `SimChip` can be shared
/// by reference between drivers on one thread but never across threads.
pub struct SimChip {
    state: RefCell<SimState>,
    reads: Cell<u32>,
}

impl SimChip {
    /// A chip in its reset state reporting `dev_id` in DBGMCU_IDCODE
    pub fn new(dev_id: u16) -> Self {
        let family = DeviceFamily::from_dev_id(dev_id).unwrap_or(DeviceFamily::F03xF05x);
        let mut registers = FnvIndexMap::new();
        let reset = [
            (rcc::CR, rcc::CR_HSION | rcc::CR_HSIRDY),
            (rcc::CFGR, 0),
            (rcc::AHBENR, 0x0000_0014),
            (rcc::APB2ENR, 0),
            (rcc::APB1ENR, 0),
            (rcc::CFGR2, 0),
            (rcc::CR2, 0),
            (flash::ACR, flash::ACR_RESET),
            (flash::SR, 0),
            (flash::CR, flash::CR_LOCK),
            (flash::AR, 0),
            (flash::OBR, 0),
            (flash::WRPR, 0xFFFF_FFFF),
            (dbgmcu::IDCODE, u32::from(dev_id)),
        ];
        for (address, value) in reset {
            let _ = registers.insert(address, value);
        }

        Self {
            state: RefCell::new(SimState {
                family,
                registers,
                memory: [0xFFFF; HALF_WORDS],
                log: Vec::new(),
                startup_polls: 2,
                switch_polls: 1,
                busy_polls: 3,
                oscillator_pending: [None; 4],
                oscillator_failed: [false; 4],
                switch_pending: None,
                pll_changed_while_on: false,
                flash_key_stage: 0,
                flash_key_fault: false,
                option_key_stage: 0,
                key_writes: 0,
                flash_busy: None,
                force_busy: false,
            }),
            reads: Cell::new(0),
        }
    }

    /// STM32F051 (one-bit PLL source, no HSI48, 1 KiB pages)
    pub fn f051() -> Self {
        Self::new(0x440)
    }

    /// STM32F072 (two-bit PLL source, HSI48, 2 KiB pages)
    pub fn f072() -> Self {
        Self::new(0x448)
    }

    /// Device description matching the simulated identity code
    pub fn device(&self) -> Device {
        let dev_id = self.peek(dbgmcu::IDCODE) as u16;
        Device::from_dev_id(dev_id).unwrap_or(Device::new(DeviceFamily::F03xF05x))
    }

    /// Number of status polls before an enabled oscillator reports ready
    pub fn set_startup_polls(&self, polls: u32) {
        self.state.borrow_mut().startup_polls = polls;
    }

    /// Number of CFGR reads before the switch status follows a request
    pub fn set_switch_polls(&self, polls: u32) {
        self.state.borrow_mut().switch_polls = polls;
    }

    /// Number of SR reads a flash operation stays busy
    pub fn set_busy_polls(&self, polls: u32) {
        self.state.borrow_mut().busy_polls = polls;
    }

    /// Make an oscillator never report ready
    pub fn fail_oscillator(&self, oscillator: Oscillator) {
        self.state.borrow_mut().oscillator_failed[Source::from_oscillator(oscillator).index()] =
            true;
    }

    /// Hold the flash busy flag set
    pub fn force_busy(&self, busy: bool) {
        let mut state = self.state.borrow_mut();
        state.force_busy = busy;
        let sr = state.get(flash::SR);
        let sr = if busy {
            sr | flash::SR_BSY
        } else if state.flash_busy.is_none() {
            sr & !flash::SR_BSY
        } else {
            sr
        };
        state.set(flash::SR, sr);
    }

    /// Write-protect the sector containing `address`
    pub fn write_protect(&self, address: u32) {
        let mut state = self.state.borrow_mut();
        let sector = (address - flash::MEMORY_BASE) / SIM_WRP_SECTOR_SIZE;
        let wrpr = state.get(flash::WRPR) & !(1 << sector);
        state.set(flash::WRPR, wrpr);
    }

    /// Latch or release the option byte loading error
    pub fn set_option_error(&self, error: bool) {
        let mut state = self.state.borrow_mut();
        let obr = state.get(flash::OBR);
        let obr = if error {
            obr | flash::OBR_OPTERR
        } else {
            obr & !flash::OBR_OPTERR
        };
        state.set(flash::OBR, obr);
    }

    /// Set the read protection level reported in OBR (raw RDPRT field)
    pub fn set_read_protection(&self, rdprt: u32) {
        let mut state = self.state.borrow_mut();
        let obr = flash::OBR_RDPRT.write(state.get(flash::OBR), rdprt);
        state.set(flash::OBR, obr);
    }

    /// Register value without read side effects
    pub fn peek(&self, address: u32) -> u32 {
        self.state.borrow().get(address)
    }

    /// Flash memory half-word without read side effects
    pub fn peek_half(&self, address: u32) -> u16 {
        let state = self.state.borrow();
        match memory_index(address) {
            Some(index) => state.memory[index],
            None => 0xFFFF,
        }
    }

    /// Preload flash memory, bypassing the controller
    pub fn poke_half(&self, address: u32, value: u16) {
        if let Some(index) = memory_index(address) {
            self.state.borrow_mut().memory[index] = value;
        }
    }

    /// Register writes so far, oldest first
    pub fn writes(&self) -> Vec<(u32, u32), LOG_CAPACITY> {
        self.state.borrow().log.clone()
    }

    /// Forget logged writes
    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    /// Position of the first logged write matching `predicate`
    pub fn first_write(&self, predicate: impl Fn(u32, u32) -> bool) -> Option<usize> {
        self.state
            .borrow()
            .log
            .iter()
            .position(|&(address, value)| predicate(address, value))
    }

    /// Number of writes to the flash key register
    pub fn key_writes(&self) -> u32 {
        self.state.borrow().key_writes
    }

    /// Whether a wrong key sequence has locked the flash until reset
    pub fn key_fault(&self) -> bool {
        self.state.borrow().flash_key_fault
    }

    /// Whether PLL settings were written while the PLL was running
    pub fn pll_changed_while_on(&self) -> bool {
        self.state.borrow().pll_changed_while_on
    }

    /// Total register reads, a proxy for time spent polling
    pub fn reads(&self) -> u32 {
        self.reads.get()
    }
}

impl RegisterBank for SimChip {
    fn read(&self, address: u32) -> u32 {
        self.reads.set(self.reads.get().wrapping_add(1));
        let mut state = self.state.borrow_mut();
        match address {
            rcc::CR | rcc::CR2 => state.tick_oscillators(),
            rcc::CFGR => state.tick_switch(),
            flash::SR => state.tick_flash(),
            _ => {}
        }
        match memory_index(address) {
            Some(index) => {
                let high = memory_index(address + 2).map_or(0xFFFF, |i| state.memory[i]);
                u32::from(state.memory[index]) | (u32::from(high) << 16)
            }
            None => state.get(address),
        }
    }

    fn write(&self, address: u32, value: u32) {
        let mut state = self.state.borrow_mut();
        state.record(address, value);
        match address {
            rcc::CR => state.write_rcc_cr(value),
            rcc::CR2 => state.write_rcc_cr2(value),
            rcc::CFGR => state.write_cfgr(value),
            rcc::CFGR2 => state.write_cfgr2(value),
            flash::KEYR => state.write_key(value),
            flash::OPTKEYR => state.write_option_key(value),
            flash::SR => state.write_sr(value),
            flash::CR => state.write_flash_cr(value),
            // Read-only
            flash::OBR | flash::WRPR | dbgmcu::IDCODE => {}
            // Main flash only accepts half-word programming
            _ if memory_index(address).is_some() => {}
            _ => state.set(address, value),
        }
    }

    fn read_half(&self, address: u32) -> u16 {
        match memory_index(address) {
            Some(_) => self.peek_half(address),
            None => self.read(address) as u16,
        }
    }

    fn write_half(&self, address: u32, value: u16) {
        let mut state = self.state.borrow_mut();
        state.record(address, u32::from(value));
        if let Some(index) = memory_index(address) {
            state.program(address, index, value);
        }
    }
}

fn memory_index(address: u32) -> Option<usize> {
    let offset = address.checked_sub(flash::MEMORY_BASE)?;
    if offset < SIM_FLASH_SIZE {
        Some((offset / 2) as usize)
    } else {
        None
    }
}

impl SimState {
    fn get(&self, address: u32) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn set(&mut self, address: u32, value: u32) {
        let _ = self.registers.insert(address, value);
    }

    fn record(&mut self, address: u32, value: u32) {
        let _ = self.log.push((address, value));
    }

    fn is_ready(&self, source: Source) -> bool {
        let (register, _, ready) = source.bits();
        self.get(register) & ready != 0
    }

    fn write_rcc_cr(&mut self, value: u32) {
        let old = self.get(rcc::CR);
        let read_only = rcc::CR_HSIRDY | rcc::CR_HSERDY | rcc::CR_PLLRDY;
        let mut new = (value & !read_only) | (old & read_only);
        if old & (rcc::CR_HSEON | rcc::CR_HSERDY) != 0 {
            new = (new & !rcc::CR_HSEBYP) | (old & rcc::CR_HSEBYP);
        }
        self.set(rcc::CR, new);
        self.start_oscillators(old, new, &[Source::Hsi, Source::Hse, Source::Pll]);
    }

    fn write_rcc_cr2(&mut self, value: u32) {
        let old = self.get(rcc::CR2);
        let mut new = (value & !rcc::CR2_HSI48RDY) | (old & rcc::CR2_HSI48RDY);
        if !self.family.has_hsi48() {
            new &= !rcc::CR2_HSI48ON;
        }
        self.set(rcc::CR2, new);
        self.start_oscillators(old, new, &[Source::Hsi48]);
    }

    fn start_oscillators(&mut self, old: u32, new: u32, sources: &[Source]) {
        for &source in sources {
            let (_, on, _) = source.bits();
            if (old ^ new) & on != 0 {
                self.oscillator_pending[source.index()] = Some(self.startup_polls);
            }
        }
    }

    fn tick_oscillators(&mut self) {
        for source in Source::ALL {
            let index = source.index();
            match self.oscillator_pending[index] {
                Some(0) => {
                    let (register, on, ready) = source.bits();
                    let value = self.get(register);
                    if value & on == 0 {
                        self.set(register, value & !ready);
                        self.oscillator_pending[index] = None;
                    } else if !self.oscillator_failed[index] {
                        self.set(register, value | ready);
                        self.oscillator_pending[index] = None;
                    }
                }
                Some(n) => self.oscillator_pending[index] = Some(n - 1),
                None => {}
            }
        }
    }

    fn write_cfgr(&mut self, value: u32) {
        let old = self.get(rcc::CFGR);
        let pll_fields = rcc::CFGR_PLLMUL.mask() | rcc::CFGR_PLLSRC_WIDE.mask();
        let mut new = rcc::CFGR_SWS.write(value, rcc::CFGR_SWS.read(old));
        if self.get(rcc::CR) & rcc::CR_PLLON != 0 && (old ^ new) & pll_fields != 0 {
            self.pll_changed_while_on = true;
            new = (new & !pll_fields) | (old & pll_fields);
        }
        if rcc::CFGR_SW.read(old) != rcc::CFGR_SW.read(new) {
            self.switch_pending = Some(self.switch_polls);
        }
        self.set(rcc::CFGR, new);
    }

    fn write_cfgr2(&mut self, value: u32) {
        let old = self.get(rcc::CFGR2);
        if self.get(rcc::CR) & rcc::CR_PLLON != 0 && old != value {
            self.pll_changed_while_on = true;
            return;
        }
        self.set(rcc::CFGR2, value);
    }

    fn tick_switch(&mut self) {
        match self.switch_pending {
            Some(0) => {
                let cfgr = self.get(rcc::CFGR);
                let sw = rcc::CFGR_SW.read(cfgr);
                if self.is_ready(Source::from_sw(sw)) {
                    self.set(rcc::CFGR, rcc::CFGR_SWS.write(cfgr, sw));
                    self.switch_pending = None;
                }
            }
            Some(n) => self.switch_pending = Some(n - 1),
            None => {}
        }
    }

    fn flash_locked(&self) -> bool {
        self.get(flash::CR) & flash::CR_LOCK != 0
    }

    fn write_key(&mut self, value: u32) {
        self.key_writes += 1;
        if self.flash_key_fault || !self.flash_locked() {
            self.flash_key_fault = true;
            return;
        }
        match (self.flash_key_stage, value) {
            (0, flash::KEY1) => self.flash_key_stage = 1,
            (1, flash::KEY2) => {
                self.flash_key_stage = 0;
                let cr = self.get(flash::CR) & !flash::CR_LOCK;
                self.set(flash::CR, cr);
            }
            _ => {
                self.flash_key_stage = 0;
                self.flash_key_fault = true;
            }
        }
    }

    fn write_option_key(&mut self, value: u32) {
        if self.flash_locked() {
            self.option_key_stage = 0;
            return;
        }
        match (self.option_key_stage, value) {
            (0, flash::OPTKEY1) => self.option_key_stage = 1,
            (1, flash::OPTKEY2) => {
                self.option_key_stage = 0;
                let cr = self.get(flash::CR) | flash::CR_OPTWRE;
                self.set(flash::CR, cr);
            }
            _ => self.option_key_stage = 0,
        }
    }

    fn write_sr(&mut self, value: u32) {
        let sr = self.get(flash::SR) & !(value & flash::SR_FLAGS);
        self.set(flash::SR, sr);
    }

    fn write_flash_cr(&mut self, value: u32) {
        if self.flash_locked() {
            return;
        }
        let old = self.get(flash::CR);
        // OPTWRE is only set by the option key sequence
        let mut new = (value & !flash::CR_OPTWRE) | (old & value & flash::CR_OPTWRE);
        if value & flash::CR_LOCK != 0 {
            self.option_key_stage = 0;
        }
        if new & flash::CR_STRT != 0 && old & flash::CR_STRT == 0 && !self.busy() {
            if new & flash::CR_PER != 0 {
                self.erase_page(self.get(flash::AR));
            } else if new & flash::CR_MER != 0 {
                self.erase_all();
            } else if new & flash::CR_OPTER != 0 && old & flash::CR_OPTWRE != 0 {
                self.start_busy();
            }
        }
        if !self.busy() {
            new &= !flash::CR_STRT;
        }
        self.set(flash::CR, new);
    }

    fn busy(&self) -> bool {
        self.get(flash::SR) & flash::SR_BSY != 0
    }

    fn start_busy(&mut self) {
        let sr = self.get(flash::SR) | flash::SR_BSY;
        self.set(flash::SR, sr);
        self.flash_busy = Some(self.busy_polls);
    }

    fn flag(&mut self, mask: u32) {
        let sr = self.get(flash::SR) | mask;
        self.set(flash::SR, sr);
    }

    fn protected(&self, address: u32) -> bool {
        let sector = (address - flash::MEMORY_BASE) / SIM_WRP_SECTOR_SIZE;
        sector < 32 && self.get(flash::WRPR) & (1 << sector) == 0
    }

    fn page_size(&self) -> u32 {
        let dev_id = self.get(dbgmcu::IDCODE) as u16;
        Device::from_dev_id(dev_id).map_or(1024, |device| device.page_size)
    }

    fn erase_page(&mut self, address: u32) {
        let Some(_) = memory_index(address) else {
            self.start_busy();
            return;
        };
        if self.protected(address) {
            self.flag(flash::SR_WRPRTERR);
            return;
        }
        let page_size = self.page_size();
        let start = address - (address - flash::MEMORY_BASE) % page_size;
        for offset in (0..page_size).step_by(2) {
            if let Some(index) = memory_index(start + offset) {
                self.memory[index] = 0xFFFF;
            }
        }
        self.start_busy();
    }

    fn erase_all(&mut self) {
        if self.get(flash::WRPR) != 0xFFFF_FFFF {
            self.flag(flash::SR_WRPRTERR);
            return;
        }
        self.memory = [0xFFFF; HALF_WORDS];
        self.start_busy();
    }

    fn program(&mut self, address: u32, index: usize, value: u16) {
        let cr = self.get(flash::CR);
        if cr & flash::CR_LOCK != 0 || cr & flash::CR_PG == 0 || self.busy() {
            return;
        }
        if self.protected(address) {
            self.flag(flash::SR_WRPRTERR);
            return;
        }
        let current = self.memory[index];
        if current != 0xFFFF && value != 0 {
            self.flag(flash::SR_PGERR);
            return;
        }
        self.memory[index] = if current == 0xFFFF { value } else { 0 };
        self.start_busy();
    }

    fn tick_flash(&mut self) {
        if self.force_busy {
            self.flag(flash::SR_BSY);
            return;
        }
        match self.flash_busy {
            Some(0) => {
                let sr = (self.get(flash::SR) & !flash::SR_BSY) | flash::SR_EOP;
                self.set(flash::SR, sr);
                let cr = self.get(flash::CR) & !flash::CR_STRT;
                self.set(flash::CR, cr);
                self.flash_busy = None;
            }
            Some(n) => self.flash_busy = Some(n - 1),
            None => {}
        }
    }
}
