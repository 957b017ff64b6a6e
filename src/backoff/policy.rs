//! Pure backoff state machines
//!
//! Each policy maps `(state, outcome) -> (wait, new state)`. Randomness is
//! passed in as a unit jitter value so the policies stay deterministic
//! under test.

use std::time::Duration;

/// Largest exponent applied to any doubling before capping
const MAX_EXPONENT: u32 = 16;

/// Tuning for the fetch (anti-bot) domain
#[derive(Debug, Clone, PartialEq)]
pub struct FetchBackoffSettings {
    /// First wait after a denial; doubles per consecutive denial
    pub base_delay: Duration,
    /// Cap for the exponential denial wait
    pub max_delay: Duration,
    /// Consecutive denials that trigger the long cooldown
    pub cooldown_after: u32,
    pub cooldown: Duration,
    /// Range for timeouts and other non-denial failures
    pub transient_min: Duration,
    pub transient_max: Duration,
    /// Attempts per fetch, including the first
    pub max_attempts: u32,
}

impl Default for FetchBackoffSettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            cooldown_after: 5,
            cooldown: Duration::from_secs(300),
            transient_min: Duration::from_secs(2),
            transient_max: Duration::from_secs(5),
            max_attempts: 6,
        }
    }
}

/// What happened on one fetch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success,
    /// Access denied or challenge page
    Denied,
    RateLimited { retry_after: Option<Duration> },
    /// Timeout, connection failure, unexpected status
    Transient,
    NotFound,
}

/// Denial counter for one source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPolicy {
    pub consecutive_denials: u32,
}

impl FetchPolicy {
    /// Computes the wait before the next attempt and the updated state
    ///
    /// `jitter` is a unit value in `[0, 1)`; out-of-range values are clamped.
    pub fn next(
        self,
        settings: &FetchBackoffSettings,
        outcome: &FetchOutcome,
        jitter: f64,
    ) -> (Duration, FetchPolicy) {
        let jitter = jitter.clamp(0.0, 0.999);

        match outcome {
            FetchOutcome::Success => (Duration::ZERO, FetchPolicy::default()),
            FetchOutcome::NotFound => (Duration::ZERO, self),
            FetchOutcome::Denied => {
                let denials = self.consecutive_denials + 1;
                if denials >= settings.cooldown_after {
                    return (settings.cooldown, FetchPolicy::default());
                }

                let exponent = (denials - 1).min(MAX_EXPONENT);
                let wait = settings
                    .base_delay
                    .saturating_mul(1 << exponent)
                    .saturating_add(settings.base_delay.mul_f64(jitter))
                    .min(settings.max_delay);

                (
                    wait,
                    FetchPolicy {
                        consecutive_denials: denials,
                    },
                )
            }
            FetchOutcome::RateLimited { retry_after } => {
                (retry_after.unwrap_or(settings.max_delay), self)
            }
            FetchOutcome::Transient => {
                let spread = settings
                    .transient_max
                    .saturating_sub(settings.transient_min);
                (settings.transient_min + spread.mul_f64(jitter), self)
            }
        }
    }
}

/// Tuning for the relay (rate-limit) domain
#[derive(Debug, Clone, PartialEq)]
pub struct RelayBackoffSettings {
    /// Minimum gap between two uploads
    pub min_interval: Duration,
    /// Base of the widening cooldown applied while throttled
    pub cooldown_base: Duration,
    /// Cap on the cooldown exponent
    pub max_exponent: u32,
    /// Added to every server-provided wait hint
    pub hint_padding: Duration,
    /// Used when a throttle response carries no hint
    pub default_hint: Duration,
    /// Linear step for non-throttle failures (step × attempt)
    pub retry_delay: Duration,
    /// Attempts for non-throttle failures
    pub max_attempts: u32,
    /// Total time one upload may spend waiting on throttles
    pub budget: Duration,
}

impl Default for RelayBackoffSettings {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            cooldown_base: Duration::from_secs(2),
            max_exponent: 5,
            hint_padding: Duration::from_secs(2),
            default_hint: Duration::from_secs(30),
            retry_delay: Duration::from_secs(3),
            max_attempts: 5,
            budget: Duration::from_secs(3600),
        }
    }
}

/// What happened on one relay attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Success,
    Throttled { retry_after: Option<Duration> },
    Failed,
}

/// Throttle counter for one sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayPolicy {
    pub consecutive_throttles: u32,
}

impl RelayPolicy {
    /// Computes the wait before retrying and the updated state
    ///
    /// `attempt` is the 1-based count of non-throttle failures so far.
    pub fn next(
        self,
        settings: &RelayBackoffSettings,
        outcome: &RelayOutcome,
        attempt: u32,
    ) -> (Duration, RelayPolicy) {
        match outcome {
            RelayOutcome::Success => (
                Duration::ZERO,
                RelayPolicy {
                    consecutive_throttles: self.consecutive_throttles.saturating_sub(1),
                },
            ),
            RelayOutcome::Throttled { retry_after } => (
                retry_after.unwrap_or(settings.default_hint) + settings.hint_padding,
                RelayPolicy {
                    consecutive_throttles: self.consecutive_throttles + 1,
                },
            ),
            RelayOutcome::Failed => (settings.retry_delay.saturating_mul(attempt.max(1)), self),
        }
    }

    /// Extra spacing between uploads while the sink has been throttling
    pub fn cooldown(&self, settings: &RelayBackoffSettings) -> Duration {
        if self.consecutive_throttles == 0 {
            return Duration::ZERO;
        }
        let exponent = self
            .consecutive_throttles
            .min(settings.max_exponent)
            .min(MAX_EXPONENT);
        settings.cooldown_base.saturating_mul(1 << exponent)
    }
}
