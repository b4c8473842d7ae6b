//! Poll Backoff
//!
//! Exponential backoff with jitter between failed polls. A successful poll
//! resets the policy and the poller returns to its regular interval.

use std::time::Duration;

use rand::Rng;

/// Default ceiling on the delay between failed polls.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Backoff tuning.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling on the delay.
    pub max_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: DEFAULT_MAX_BACKOFF,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Backoff for a poller running every `interval`: the first retry waits
    /// about one interval and the delay never drops below it.
    #[must_use]
    pub fn for_interval(interval: Duration) -> Self {
        Self {
            initial_delay: interval,
            max_delay: DEFAULT_MAX_BACKOFF.max(interval),
            ..Self::default()
        }
    }
}

/// Consecutive-failure tracker producing retry delays.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
///
/// use quote_hub::infrastructure::yahoo::{Backoff, BackoffConfig};
///
/// let mut backoff = Backoff::new(BackoffConfig {
///     initial_delay: Duration::from_millis(100),
///     jitter_factor: 0.0,
///     ..BackoffConfig::default()
/// });
///
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
///
/// backoff.reset();
/// assert_eq!(backoff.failures(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current_delay: Duration,
    failures: u32,
}

impl Backoff {
    /// Create a policy with no recorded failures.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before the next poll.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);

        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay
    }

    /// Forget past failures after a successful poll.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = adjusted_millis as u64;
        Duration::from_millis(adjusted)
    }
}
