//! Declarative backoff configuration.
//!
//! [`Backoff`] is plain data: a delay curve, optional bounds and a jitter
//! mode. It can be compared, cloned, logged and (with the `serde` feature)
//! loaded from a config file. Convert it into a [`RetryPolicy`] to use it.

use std::time::Duration;

use crate::retry::{RetryPolicy, RetryStatus};

/// Retry configuration as data.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use undertow::retry::{Backoff, RetryPolicy, RetryStatus};
///
/// let backoff = Backoff::exponential(Duration::from_millis(100))
///     .with_max_retries(3)
///     .with_max_delay(Duration::from_millis(250));
/// assert!(backoff.validate().is_ok());
///
/// let policy = RetryPolicy::from(backoff);
/// assert_eq!(policy.apply(&RetryStatus::new()), Some(Duration::from_millis(100)));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Backoff {
    strategy: BackoffStrategy,
    max_retries: Option<u32>,
    max_delay: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(default))]
    jitter: Jitter,
}

/// Shape of the delay curve.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BackoffStrategy {
    /// The same delay every time.
    Constant(Duration),
    /// `base * (iteration + 1)`
    Linear {
        /// Delay unit.
        base: Duration,
    },
    /// `base * 2^iteration`
    Exponential {
        /// Delay unit.
        base: Duration,
    },
    /// `base * fib(iteration + 1)`
    Fibonacci {
        /// Delay unit.
        base: Duration,
    },
}

/// Randomization applied on top of the computed delay.
///
/// Without the `jitter` feature every mode behaves like [`Jitter::None`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Jitter {
    /// Use the computed delay as is.
    #[default]
    None,
    /// Spread by ±factor of the computed delay.
    Proportional(f64),
    /// Anywhere between zero and the computed delay.
    Full,
    /// Between the computed delay and three times the previous delay.
    Decorrelated,
}

impl Backoff {
    fn with_strategy(strategy: BackoffStrategy) -> Self {
        Backoff {
            strategy,
            max_retries: None,
            max_delay: None,
            jitter: Jitter::None,
        }
    }

    /// Fixed delay.
    pub fn constant(delay: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Constant(delay))
    }

    /// Linearly growing delay.
    pub fn linear(base: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Linear { base })
    }

    /// Doubling delay.
    pub fn exponential(base: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Exponential { base })
    }

    /// Fibonacci-growing delay.
    pub fn fibonacci(base: Duration) -> Self {
        Self::with_strategy(BackoffStrategy::Fibonacci { base })
    }

    /// Retry at most `n` times after the first attempt.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Never wait longer than `d`, jitter included.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// ±`factor` proportional jitter, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = Jitter::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Full jitter.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = Jitter::Full;
        self
    }

    /// Decorrelated jitter.
    pub fn with_decorrelated_jitter(mut self) -> Self {
        self.jitter = Jitter::Decorrelated;
        self
    }

    /// Configured retry limit.
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Configured delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Configured delay curve.
    pub fn strategy(&self) -> &BackoffStrategy {
        &self.strategy
    }

    /// Configured jitter.
    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    /// Delay before retry number `iteration`, ignoring jitter.
    ///
    /// `None` once `max_retries` is reached.
    pub fn delay_for(&self, iteration: u32) -> Option<Duration> {
        if self.max_retries.is_some_and(|max| iteration >= max) {
            return None;
        }

        let raw = match &self.strategy {
            BackoffStrategy::Constant(d) => *d,
            BackoffStrategy::Linear { base } => base.saturating_mul(iteration.saturating_add(1)),
            BackoffStrategy::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(iteration))
            }
            BackoffStrategy::Fibonacci { base } => {
                base.saturating_mul(fibonacci(iteration.saturating_add(1)))
            }
        };

        Some(self.cap(raw))
    }

    /// Decide for `status`, jitter included.
    pub fn delay_with_jitter(&self, status: &RetryStatus) -> Option<Duration> {
        let delay = self.delay_for(status.iteration)?;
        Some(self.cap(self.jitter.apply(delay, status.previous_delay)))
    }

    /// Reject configurations that would retry forever.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_retries.is_none() && self.max_delay.is_none() {
            Err("backoff needs at least one bound (max_retries or max_delay)")
        } else {
            Ok(())
        }
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl From<Backoff> for RetryPolicy {
    fn from(backoff: Backoff) -> Self {
        RetryPolicy::from_fn(move |status| backoff.delay_with_jitter(status))
    }
}

impl Jitter {
    /// Randomize `delay`. `previous` feeds decorrelated jitter.
    #[cfg(feature = "jitter")]
    pub fn apply(&self, delay: Duration, previous: Option<Duration>) -> Duration {
        use rand::Rng;

        match self {
            Jitter::None => delay,
            Jitter::Proportional(factor) => {
                let millis = delay.as_millis() as f64;
                let spread = millis * factor;
                let low = (millis - spread).max(0.0);
                let high = millis + spread;
                if high <= low {
                    return delay;
                }
                Duration::from_millis(rand::rng().random_range(low..=high) as u64)
            }
            Jitter::Full => {
                let high = delay.as_millis() as u64;
                if high == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=high))
                }
            }
            Jitter::Decorrelated => {
                let low = delay.as_millis() as u64;
                let high = previous.unwrap_or(delay).as_millis().saturating_mul(3) as u64;
                if high <= low {
                    delay
                } else {
                    Duration::from_millis(rand::rng().random_range(low..=high))
                }
            }
        }
    }

    /// Randomize `delay`. Without the `jitter` feature this is the identity.
    #[cfg(not(feature = "jitter"))]
    pub fn apply(&self, delay: Duration, _previous: Option<Duration>) -> Duration {
        delay
    }
}

fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    if n == 0 {
        return 0;
    }
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_curves() {
        let linear = Backoff::linear(ms(100)).with_max_retries(5);
        assert_eq!(linear.delay_for(0), Some(ms(100)));
        assert_eq!(linear.delay_for(2), Some(ms(300)));

        let exp = Backoff::exponential(ms(100)).with_max_retries(5);
        assert_eq!(exp.delay_for(3), Some(ms(800)));

        let fib = Backoff::fibonacci(ms(100)).with_max_retries(6);
        let seq: Vec<_> = (0..5).filter_map(|i| fib.delay_for(i)).collect();
        assert_eq!(seq, vec![ms(100), ms(100), ms(200), ms(300), ms(500)]);
    }

    #[test]
    fn test_max_retries_bound() {
        let backoff = Backoff::constant(ms(10)).with_max_retries(2);
        assert!(backoff.delay_for(1).is_some());
        assert_eq!(backoff.delay_for(2), None);
    }

    #[test]
    fn test_max_delay_caps() {
        let backoff = Backoff::exponential(ms(100)).with_max_delay(ms(250));
        assert_eq!(backoff.delay_for(5), Some(ms(250)));
    }

    #[test]
    fn test_validate() {
        assert!(Backoff::constant(ms(1)).validate().is_err());
        assert!(Backoff::constant(ms(1)).with_max_retries(1).validate().is_ok());
        assert!(Backoff::constant(ms(1)).with_max_delay(ms(5)).validate().is_ok());
    }

    #[test]
    fn test_into_policy_uses_status_iteration() {
        let policy = RetryPolicy::from(Backoff::exponential(ms(10)).with_max_retries(2));
        let first = RetryStatus::new();
        let second = first.apply_delay(ms(10));
        let third = second.apply_delay(ms(20));
        assert_eq!(policy.apply(&first), Some(ms(10)));
        assert_eq!(policy.apply(&second), Some(ms(20)));
        assert_eq!(policy.apply(&third), None);
    }

    #[test]
    fn test_jitter_factor_is_clamped() {
        let backoff = Backoff::constant(ms(1)).with_jitter(3.0);
        assert_eq!(backoff.jitter(), &Jitter::Proportional(1.0));
    }

    #[cfg(feature = "jitter")]
    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::constant(ms(100))
            .with_full_jitter()
            .with_max_retries(1);
        for _ in 0..100 {
            let d = backoff.delay_with_jitter(&RetryStatus::new()).unwrap();
            assert!(d <= ms(100));
        }

        let proportional = Backoff::constant(ms(100))
            .with_jitter(0.25)
            .with_max_delay(ms(110));
        for _ in 0..100 {
            let d = proportional
                .delay_with_jitter(&RetryStatus::new())
                .unwrap();
            assert!(d >= ms(75) && d <= ms(110));
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_config() {
        let backoff = Backoff::exponential(ms(100))
            .with_max_retries(4)
            .with_full_jitter();
        let json = serde_json::to_string(&backoff).unwrap();
        let back: Backoff = serde_json::from_str(&json).unwrap();
        assert_eq!(back, backoff);
    }
}
