//! Clock tree sequencing
//!
//! [`ClockTree::apply_plan`] moves the chip from whatever clock it runs on
//! to a validated [`ClockPlan`] in this order:
//!
//! 1. Raise flash wait states if the target needs more
//! 2. Start the oscillator the plan needs
//! 3. Reprogram the PLL when it is the target and does not already match,
//!    parking the system on HSI first if the PLL is driving it
//! 4. Write the AHB prescaler, the APB prescaler, then the switch request,
//!    and wait for the switch status to confirm
//! 5. Lower flash wait states (or change prefetch) now that the new clock runs
//!
//! Flash timing is therefore sufficient at every instant of the transition.

use metronome_core::config::{
    AhbPrescaler, ApbPrescaler, ClockSource, McoSource, Oscillator, OscillatorState, PllConfig,
    PllSource,
};
use metronome_core::timing::TimingSchedule;
use metronome_core::{ClockPlan, ClockTreeConfig, Clocks, ConfigError, Event, State};
use metronome_hal::{BusClock, Hertz, Poll, RegisterBank};

use super::oscillator::Oscillators;
use super::pll::Pll;
use crate::chip::Chip;
use crate::flash::AccessControl;
use crate::registers::{flash, rcc};

fn encode_source(source: ClockSource) -> u32 {
    match source {
        ClockSource::Hsi => rcc::SW_HSI,
        ClockSource::Hse => rcc::SW_HSE,
        ClockSource::Pll => rcc::SW_PLL,
        ClockSource::Hsi48 => rcc::SW_HSI48,
    }
}

fn encode_ahb(prescaler: AhbPrescaler) -> u32 {
    match prescaler {
        AhbPrescaler::Div1 => 0b0000,
        AhbPrescaler::Div2 => 0b1000,
        AhbPrescaler::Div4 => 0b1001,
        AhbPrescaler::Div8 => 0b1010,
        AhbPrescaler::Div16 => 0b1011,
        AhbPrescaler::Div64 => 0b1100,
        AhbPrescaler::Div128 => 0b1101,
        AhbPrescaler::Div256 => 0b1110,
        AhbPrescaler::Div512 => 0b1111,
    }
}

fn decode_ahb(bits: u32) -> AhbPrescaler {
    match bits {
        0b1000 => AhbPrescaler::Div2,
        0b1001 => AhbPrescaler::Div4,
        0b1010 => AhbPrescaler::Div8,
        0b1011 => AhbPrescaler::Div16,
        0b1100 => AhbPrescaler::Div64,
        0b1101 => AhbPrescaler::Div128,
        0b1110 => AhbPrescaler::Div256,
        0b1111 => AhbPrescaler::Div512,
        _ => AhbPrescaler::Div1,
    }
}

fn encode_apb(prescaler: ApbPrescaler) -> u32 {
    match prescaler {
        ApbPrescaler::Div1 => 0b000,
        ApbPrescaler::Div2 => 0b100,
        ApbPrescaler::Div4 => 0b101,
        ApbPrescaler::Div8 => 0b110,
        ApbPrescaler::Div16 => 0b111,
    }
}

fn decode_apb(bits: u32) -> ApbPrescaler {
    match bits {
        0b100 => ApbPrescaler::Div2,
        0b101 => ApbPrescaler::Div4,
        0b110 => ApbPrescaler::Div8,
        0b111 => ApbPrescaler::Div16,
        _ => ApbPrescaler::Div1,
    }
}

fn encode_mco(mco: McoSource) -> u32 {
    match mco {
        McoSource::Disabled => 0b0000,
        McoSource::Hsi14 => 0b0001,
        McoSource::Lsi => 0b0010,
        McoSource::Lse => 0b0011,
        McoSource::Sysclk => 0b0100,
        McoSource::Hsi => 0b0101,
        McoSource::Hse => 0b0110,
        McoSource::Pll => 0b0111,
        McoSource::Hsi48 => 0b1000,
    }
}

fn decode_mco(bits: u32) -> McoSource {
    match bits {
        0b0001 => McoSource::Hsi14,
        0b0010 => McoSource::Lsi,
        0b0011 => McoSource::Lse,
        0b0100 => McoSource::Sysclk,
        0b0101 => McoSource::Hsi,
        0b0110 => McoSource::Hse,
        0b0111 => McoSource::Pll,
        0b1000 => McoSource::Hsi48,
        _ => McoSource::Disabled,
    }
}

/// Clock tree configurator
pub struct ClockTree<'a, B: ?Sized, P> {
    chip: Chip<'a, B, P>,
    state: State,
}

impl<'a, B: RegisterBank + ?Sized, P: Poll> ClockTree<'a, B, P> {
    pub fn new(chip: Chip<'a, B, P>) -> Self {
        Self {
            chip,
            state: State::Idle,
        }
    }

    /// Phase of the last transition
    pub fn state(&self) -> State {
        self.state
    }

    /// Forget the outcome of the last transition
    ///
    /// Moves an `Active` or `Error` tree back to [`State::Idle`]. The
    /// registers keep running the current configuration.
    pub fn reset_state(&mut self) {
        self.step(Event::Reset);
    }

    fn step(&mut self, event: Event) {
        self.state = self.state.transition(event);
    }

    /// Validate a configuration and apply it
    ///
    /// A rejected configuration leaves every register untouched and moves
    /// the tree to [`State::Error`].
    pub fn apply(&mut self, config: &ClockTreeConfig) -> Result<Clocks, ConfigError> {
        match config.validate(self.chip.device()) {
            Ok(plan) => {
                self.apply_plan(&plan);
                Ok(plan.clocks())
            }
            Err(err) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("clock configuration rejected: {}", err);

                self.step(Event::Rejected(err));
                Err(err)
            }
        }
    }

    /// Apply a validated plan
    pub fn apply_plan(&mut self, plan: &ClockPlan) {
        let config = plan.config();
        let access = AccessControl::new(self.chip);
        let oscillators = Oscillators::new(self.chip);

        #[cfg(feature = "defmt")]
        defmt::info!("clock transition to {} at {}", config.source, plan.clocks().sysclk);

        self.step(Event::Start);
        let schedule = TimingSchedule::between(access.current(), plan.timing());
        if let Some(timing) = schedule.before_switch {
            access.apply(timing);
        }
        self.step(Event::TimingReady);

        if oscillators.hse_bypass() != config.hse_bypass {
            self.change_hse_bypass(config.hse_bypass, &oscillators);
        }
        if let Some(oscillator) = plan.required_oscillator() {
            oscillators.enable(oscillator);
        }
        let uses_pll = config.source == ClockSource::Pll;
        self.step(Event::SourcesReady { pll: uses_pll });

        if let Some(pll) = config.pll {
            self.prepare_pll(&pll, &oscillators);
            self.step(Event::PllLocked);
        }

        let regs = self.chip.regs();
        let sw = encode_source(config.source);
        regs.modify(rcc::CFGR, |v| rcc::CFGR_HPRE.write(v, encode_ahb(config.ahb_prescaler)));
        regs.modify(rcc::CFGR, |v| rcc::CFGR_PPRE.write(v, encode_apb(config.apb_prescaler)));
        regs.modify(rcc::CFGR, |v| rcc::CFGR_SW.write(v, sw));
        self.wait_switch(sw);
        self.step(Event::SwitchConfirmed);

        if let Some(timing) = schedule.after_switch {
            access.apply(timing);
        }
        oscillators.set_css(config.css);
        regs.modify(rcc::CFGR, |v| rcc::CFGR_MCO.write(v, encode_mco(config.mco)));

        #[cfg(feature = "defmt")]
        defmt::info!("clock tree active at {}", self.current_frequency());
    }

    /// Bring the PLL to `pll`, locked
    fn prepare_pll(&self, pll: &PllConfig, oscillators: &Oscillators<'a, B, P>) {
        let driver = Pll::new(self.chip);
        if driver.is_locked() && driver.config() == *pll {
            return;
        }

        if self.active_source() == ClockSource::Pll {
            self.park_on_hsi(oscillators);
        }

        // Validated plans only carry sources the family supports
        if driver.configure(pll).is_ok() {
            driver.enable();
        }
    }

    /// Stop HSE (and anything it drives) so the bypass bit can change
    fn change_hse_bypass(&self, bypass: bool, oscillators: &Oscillators<'a, B, P>) {
        if oscillators.state(Oscillator::Hse) != OscillatorState::Disabled {
            let pll = Pll::new(self.chip);
            let pll_on_hse = pll.is_enabled() && pll.config().source == PllSource::HsePrediv;
            let active = self.active_source();
            if active == ClockSource::Hse || (active == ClockSource::Pll && pll_on_hse) {
                self.park_on_hsi(oscillators);
            }
            if pll_on_hse {
                pll.disable();
            }
            oscillators.disable(Oscillator::Hse);
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("HSE bypass {}", bypass);

        oscillators.set_hse_bypass(bypass);
    }

    fn park_on_hsi(&self, oscillators: &Oscillators<'a, B, P>) {
        #[cfg(feature = "defmt")]
        defmt::debug!("parking system clock on HSI");

        oscillators.enable(Oscillator::Hsi);
        self.chip
            .regs()
            .modify(rcc::CFGR, |v| rcc::CFGR_SW.write(v, rcc::SW_HSI));
        self.wait_switch(rcc::SW_HSI);
    }

    fn wait_switch(&self, sw: u32) {
        let regs = self.chip.regs();
        self.chip
            .poll()
            .until(|| rcc::CFGR_SWS.read(regs.read(rcc::CFGR)) == sw);
    }

    /// Source confirmed by the switch status bits
    pub fn active_source(&self) -> ClockSource {
        match rcc::CFGR_SWS.read(self.chip.regs().read(rcc::CFGR)) {
            rcc::SW_HSE => ClockSource::Hse,
            rcc::SW_PLL => ClockSource::Pll,
            rcc::SW_HSI48 if self.chip.device().family.has_hsi48() => ClockSource::Hsi48,
            _ => ClockSource::Hsi,
        }
    }

    /// System clock decoded from the switch status and PLL registers
    pub fn current_frequency(&self) -> Hertz {
        let device = self.chip.device();
        match self.active_source() {
            ClockSource::Hsi => device.oscillator_frequency(Oscillator::Hsi),
            ClockSource::Hse => device.oscillator_frequency(Oscillator::Hse),
            ClockSource::Hsi48 => device.oscillator_frequency(Oscillator::Hsi48),
            ClockSource::Pll => Pll::new(self.chip).frequency(),
        }
    }

    /// System and bus clocks decoded from the registers
    pub fn clocks(&self) -> Clocks {
        let cfgr = self.chip.regs().read(rcc::CFGR);
        let sysclk = self.current_frequency();
        let pll = match self.active_source() {
            ClockSource::Pll => Some(sysclk),
            _ => None,
        };
        Clocks::derive(
            sysclk,
            decode_ahb(rcc::CFGR_HPRE.read(cfgr)),
            decode_apb(rcc::CFGR_PPRE.read(cfgr)),
            pll,
        )
    }

    /// Read back the configuration the registers describe
    pub fn config(&self) -> ClockTreeConfig {
        let regs = self.chip.regs();
        let cfgr = regs.read(rcc::CFGR);
        let cr = regs.read(rcc::CR);
        let source = self.active_source();

        ClockTreeConfig {
            source,
            pll: match source {
                ClockSource::Pll => Some(Pll::new(self.chip).config()),
                _ => None,
            },
            ahb_prescaler: decode_ahb(rcc::CFGR_HPRE.read(cfgr)),
            apb_prescaler: decode_apb(rcc::CFGR_PPRE.read(cfgr)),
            target_frequency: self.current_frequency(),
            prefetch: regs.is_set(flash::ACR, flash::ACR_PRFTBE),
            css: cr & rcc::CR_CSSON != 0,
            hse_bypass: cr & rcc::CR_HSEBYP != 0,
            mco: decode_mco(rcc::CFGR_MCO.read(cfgr)),
        }
    }
}

impl<B: RegisterBank + ?Sized, P: Poll> BusClock for ClockTree<'_, B, P> {
    fn current_frequency(&self) -> Hertz {
        ClockTree::current_frequency(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;
    use metronome_core::config::{PllMul, PreDiv};
    use metronome_core::{Device, DeviceFamily, FlashTiming};
    use metronome_hal::Bounded;

    fn tree(sim: &SimChip) -> ClockTree<'_, SimChip, Bounded> {
        ClockTree::new(Chip::new(sim, sim.device()).with_poll(Bounded::new(1_000)))
    }

    fn pll_config(source: PllSource, mul: u8, target_mhz: u32) -> ClockTreeConfig {
        let pll = metronome_core::config::PllConfig::new(source, PllMul::new(mul).unwrap());
        ClockTreeConfig::pll(pll, Hertz::mhz(target_mhz))
    }

    fn is_acr(address: u32, _: u32) -> bool {
        address == flash::ACR
    }

    fn is_switch_to(sw: u32) -> impl Fn(u32, u32) -> bool {
        move |address, value| address == rcc::CFGR && rcc::CFGR_SW.read(value) == sw
    }

    fn timing(sim: &SimChip) -> FlashTiming {
        AccessControl::new(Chip::new(sim, sim.device())).current()
    }

    #[test]
    fn test_hsi_8mhz_leaves_latency_alone() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        let clocks = tree.apply(&ClockTreeConfig::hsi_8mhz()).unwrap();

        assert_eq!(clocks.sysclk, Hertz::mhz(8));
        assert_eq!(tree.current_frequency(), Hertz(8_000_000));
        assert_eq!(sim.first_write(is_acr), None);
        assert_eq!(tree.state(), State::Active);
    }

    #[test]
    fn test_pll_32mhz_raises_latency_before_switch() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        tree.apply(&pll_config(PllSource::HsiDiv2, 8, 32)).unwrap();

        let latency = sim.first_write(is_acr).unwrap();
        let switch = sim.first_write(is_switch_to(rcc::SW_PLL)).unwrap();
        assert!(latency < switch);
        assert_eq!(timing(&sim).wait_states, 1);
        assert_eq!(tree.current_frequency(), Hertz(32_000_000));
        assert_eq!(tree.active_source(), ClockSource::Pll);
    }

    #[test]
    fn test_lowering_latency_waits_for_switch_status() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        tree.apply(&ClockTreeConfig::hsi_pll_48mhz()).unwrap();
        sim.clear_log();

        tree.apply(&ClockTreeConfig::hsi_8mhz()).unwrap();
        let switch = sim.first_write(is_switch_to(rcc::SW_HSI)).unwrap();
        let latency = sim.first_write(is_acr).unwrap();
        assert!(switch < latency);
        assert_eq!(timing(&sim).wait_states, 0);
        assert_eq!(tree.current_frequency(), Hertz::mhz(8));
    }

    #[test]
    fn test_prescalers_written_ahb_then_apb_then_switch() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        let config = ClockTreeConfig::hsi_pll_48mhz()
            .with_ahb_prescaler(AhbPrescaler::Div2)
            .with_apb_prescaler(ApbPrescaler::Div4);
        tree.apply(&config).unwrap();

        let ahb = sim
            .first_write(|a, v| a == rcc::CFGR && rcc::CFGR_HPRE.read(v) == 0b1000)
            .unwrap();
        let apb = sim
            .first_write(|a, v| a == rcc::CFGR && rcc::CFGR_PPRE.read(v) == 0b101)
            .unwrap();
        let switch = sim.first_write(is_switch_to(rcc::SW_PLL)).unwrap();
        assert!(ahb < apb && apb < switch);

        let clocks = tree.clocks();
        assert_eq!(clocks.hclk, Hertz::mhz(24));
        assert_eq!(clocks.pclk, Hertz::mhz(6));
    }

    #[test]
    fn test_rejected_config_touches_nothing() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        sim.clear_log();

        let result = tree.apply(&pll_config(PllSource::HsiDiv2, 16, 64));
        assert!(result.is_err());
        assert!(sim.writes().is_empty());
        assert!(tree.state().is_error());
    }

    #[test]
    fn test_reset_state_keeps_clock() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        let _ = tree.apply(&ClockTreeConfig::hsi48_48mhz());
        assert!(tree.state().is_error());
        tree.reset_state();
        assert_eq!(tree.state(), State::Idle);

        tree.apply(&ClockTreeConfig::hsi_pll_48mhz()).unwrap();
        sim.clear_log();
        tree.reset_state();
        assert_eq!(tree.state(), State::Idle);
        assert!(sim.writes().is_empty());
        assert_eq!(tree.current_frequency(), Hertz::mhz(48));
    }

    #[test]
    fn test_read_back_round_trip() {
        let sim = SimChip::f072();
        let mut tree = tree(&sim);
        let pll = metronome_core::config::PllConfig::new(PllSource::HsiPrediv, PllMul::new(12).unwrap())
            .with_prediv(PreDiv::new(2).unwrap());
        let config = ClockTreeConfig::pll(pll, Hertz::mhz(48))
            .with_apb_prescaler(ApbPrescaler::Div2)
            .with_mco(McoSource::Sysclk);
        tree.apply(&config).unwrap();

        assert_eq!(tree.config(), config);
    }

    #[test]
    fn test_hse_with_bypass_and_css() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        let config = ClockTreeConfig::hse_pll_48mhz().with_hse_bypass(true);
        tree.apply(&config).unwrap();

        let cr = sim.peek(rcc::CR);
        assert!(cr & rcc::CR_HSEBYP != 0);
        assert!(cr & rcc::CR_CSSON != 0);
        let bypass = sim.first_write(|a, v| a == rcc::CR && v & rcc::CR_HSEBYP != 0);
        let start = sim.first_write(|a, v| a == rcc::CR && v & rcc::CR_HSEON != 0);
        assert!(bypass < start);
        assert_eq!(tree.config(), config);
    }

    #[test]
    fn test_bypass_change_restarts_running_hse() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        tree.apply(&ClockTreeConfig::hse_pll_48mhz()).unwrap();
        sim.clear_log();

        let config = ClockTreeConfig::hse_pll_48mhz().with_hse_bypass(true);
        tree.apply(&config).unwrap();
        assert_eq!(tree.config(), config);
        assert!(!sim.pll_changed_while_on());

        let park = sim.first_write(is_switch_to(rcc::SW_HSI)).unwrap();
        let stop = sim
            .first_write(|a, v| a == rcc::CR && v & rcc::CR_HSEON == 0)
            .unwrap();
        let bypass = sim
            .first_write(|a, v| a == rcc::CR && v & rcc::CR_HSEBYP != 0)
            .unwrap();
        let switch = sim.first_write(is_switch_to(rcc::SW_PLL)).unwrap();
        assert!(park < stop && stop < bypass && bypass < switch);
        assert_eq!(tree.current_frequency(), Hertz::mhz(48));
    }

    #[test]
    fn test_bypass_cleared_on_hse_direct() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        let bypassed = ClockTreeConfig::new(ClockSource::Hse, Hertz::mhz(8)).with_hse_bypass(true);
        tree.apply(&bypassed).unwrap();
        assert_eq!(tree.config(), bypassed);

        let crystal = ClockTreeConfig::new(ClockSource::Hse, Hertz::mhz(8));
        tree.apply(&crystal).unwrap();
        assert_eq!(tree.config(), crystal);
        assert_eq!(tree.active_source(), ClockSource::Hse);
    }

    #[test]
    fn test_running_pll_reprogrammed_via_hsi() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        tree.apply(&pll_config(PllSource::HsiDiv2, 8, 32)).unwrap();
        sim.clear_log();

        tree.apply(&ClockTreeConfig::hsi_pll_48mhz()).unwrap();
        assert!(!sim.pll_changed_while_on());
        let park = sim.first_write(is_switch_to(rcc::SW_HSI)).unwrap();
        let reconfigure = sim
            .first_write(|a, v| a == rcc::CFGR && rcc::CFGR_PLLMUL.read(v) == 10)
            .unwrap();
        let switch = sim.first_write(is_switch_to(rcc::SW_PLL)).unwrap();
        assert!(park < reconfigure && reconfigure < switch);
        assert_eq!(tree.current_frequency(), Hertz::mhz(48));
    }

    #[test]
    fn test_matching_pll_not_reprogrammed() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        tree.apply(&ClockTreeConfig::hsi_pll_48mhz()).unwrap();
        sim.clear_log();

        tree.apply(&ClockTreeConfig::hsi_pll_48mhz()).unwrap();
        assert_eq!(sim.first_write(is_switch_to(rcc::SW_HSI)), None);
        assert_eq!(sim.first_write(|a, _| a == rcc::CFGR2), None);
        assert_eq!(sim.first_write(is_acr), None);
    }

    #[test]
    fn test_hsi48_direct() {
        let sim = SimChip::f072();
        let mut tree = tree(&sim);
        tree.apply(&ClockTreeConfig::hsi48_48mhz()).unwrap();
        assert_eq!(tree.active_source(), ClockSource::Hsi48);
        assert_eq!(BusClock::current_frequency(&tree), Hertz::mhz(48));
    }

    #[test]
    fn test_hsi48_rejected_on_small_family() {
        let sim = SimChip::f051();
        let mut tree = tree(&sim);
        assert_eq!(
            tree.apply(&ClockTreeConfig::hsi48_48mhz()),
            Err(ConfigError::UnsupportedSource(ClockSource::Hsi48))
        );
    }

    #[test]
    fn test_board_crystal_frequency() {
        let sim = SimChip::f051();
        let device = Device::new(DeviceFamily::F03xF05x).with_hse(Hertz::mhz(12));
        let mut tree = ClockTree::new(Chip::new(&sim, device).with_poll(Bounded::new(1_000)));
        tree.apply(&pll_config(PllSource::HsePrediv, 4, 48)).unwrap();
        assert_eq!(tree.current_frequency(), Hertz::mhz(48));
    }

    #[test]
    #[should_panic(expected = "hardware flag not observed")]
    fn test_dead_crystal_hangs_transition() {
        let sim = SimChip::f051();
        sim.fail_oscillator(Oscillator::Hse);
        let _ = tree(&sim).apply(&ClockTreeConfig::hse_pll_48mhz());
    }
}
