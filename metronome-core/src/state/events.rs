//! Events that trigger state transitions

use crate::config::ConfigError;

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A validated plan is about to be applied
    Start,
    /// Validation refused the requested configuration
    Rejected(ConfigError),
    /// Flash timing is sufficient for the target frequency
    TimingReady,
    /// Every oscillator the plan needs reports ready
    SourcesReady {
        /// The plan runs the system from the PLL
        pll: bool,
    },
    /// The PLL is configured and locked (or already matched)
    PllLocked,
    /// Switch status bits report the requested source
    SwitchConfirmed,
    /// Forget the last outcome
    Reset,
}
