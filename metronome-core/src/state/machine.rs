//! State machine definition

use super::events::Event;
use crate::config::ConfigError;

/// Clock tree states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// No transition has run yet
    #[default]
    Idle,
    /// Raising flash wait states ahead of a faster clock
    ApplyingFlashTiming,
    /// Waiting for oscillators to become ready
    StartingSources,
    /// Reprogramming and locking the PLL
    ConfiguringPll,
    /// Prescalers written, waiting for the switch status to follow
    Switching,
    /// Running the last applied plan
    Active,
    /// The last requested configuration was rejected
    Error(ConfigError),
}

impl State {
    /// Check if a transition is in progress
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            State::ApplyingFlashTiming
                | State::StartingSources
                | State::ConfiguringPll
                | State::Switching
        )
    }

    /// Check if this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, State::Error(_))
    }

    /// Process an event and return the next state
    pub fn transition(self, event: Event) -> Self {
        use Event::*;
        use State::*;

        match (self, event) {
            // A new plan may start from any resting state
            (Idle | Active | Error(_), Start) => ApplyingFlashTiming,
            (Idle | Active | Error(_), Rejected(err)) => Error(err),

            (ApplyingFlashTiming, TimingReady) => StartingSources,

            (StartingSources, SourcesReady { pll: true }) => ConfiguringPll,
            (StartingSources, SourcesReady { pll: false }) => Switching,

            (ConfiguringPll, PllLocked) => Switching,

            (Switching, SwitchConfirmed) => Active,

            (Active | Error(_), Reset) => Idle,

            // Default: stay in current state
            _ => self,
        }
    }
}
