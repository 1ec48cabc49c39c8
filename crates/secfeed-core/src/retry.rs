//! Bounded retry with exponential backoff and jitter.

use std::time::Duration;

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `base * factor^retry`, capped at `max`, optionally jittered by +/- 50%.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = base.as_secs_f64() * factor.powi(exponent);
                let mut delay = Duration::from_secs_f64(seconds.min(max.as_secs_f64()));

                if jitter {
                    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    let spread = millis / 2;
                    let offset = fastrand::u64(0..=spread.saturating_mul(2));
                    delay = Duration::from_millis((millis + offset).saturating_sub(spread));
                }

                delay
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per request, first one included.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed { delay },
        }
    }
}

/// Where a single request stands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryState {
    Idle,
    Attempting { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Success { attempts: u32 },
    Failed { attempts: u32 },
}

/// Explicit state machine for one request's retry loop.
///
/// `Idle -> Attempting -> (Success | Retrying -> Attempting | Failed)`.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    config: RetryConfig,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: RetryState::Idle,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Begin the next attempt; returns its 1-based number, or `None` once terminal.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        let attempt = match self.state {
            RetryState::Idle => 1,
            RetryState::Retrying { attempt, .. } => attempt + 1,
            RetryState::Attempting { .. }
            | RetryState::Success { .. }
            | RetryState::Failed { .. } => return None,
        };
        self.state = RetryState::Attempting { attempt };
        Some(attempt)
    }

    pub fn succeed(&mut self) {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = RetryState::Success { attempts: attempt };
        }
    }

    /// Record a failed attempt and return the next state.
    pub fn fail(&mut self, retryable: bool) -> RetryState {
        if let RetryState::Attempting { attempt } = self.state {
            self.state = if retryable && attempt < self.config.max_attempts.max(1) {
                RetryState::Retrying {
                    attempt,
                    delay: self.config.backoff.delay(attempt - 1),
                }
            } else {
                RetryState::Failed { attempts: attempt }
            };
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(max_attempts: u32) -> RetryMachine {
        RetryMachine::new(RetryConfig::fixed(Duration::from_millis(10), max_attempts))
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_half_of_the_base() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(2),
            jitter: true,
        };

        for _ in 0..20 {
            let millis = backoff.delay(0).as_millis();
            assert!((100..=300).contains(&millis), "{millis}");
        }
    }

    #[test]
    fn retryable_failures_retry_until_the_budget_is_spent() {
        let mut machine = fixed(3);

        assert_eq!(machine.begin_attempt(), Some(1));
        assert!(matches!(machine.fail(true), RetryState::Retrying { attempt: 1, .. }));
        assert_eq!(machine.begin_attempt(), Some(2));
        assert!(matches!(machine.fail(true), RetryState::Retrying { attempt: 2, .. }));
        assert_eq!(machine.begin_attempt(), Some(3));
        assert_eq!(machine.fail(true), RetryState::Failed { attempts: 3 });
        assert_eq!(machine.begin_attempt(), None);
    }

    #[test]
    fn non_retryable_failures_stop_immediately() {
        let mut machine = fixed(3);

        machine.begin_attempt();
        assert_eq!(machine.fail(false), RetryState::Failed { attempts: 1 });
    }

    #[test]
    fn success_is_terminal() {
        let mut machine = fixed(3);

        machine.begin_attempt();
        machine.fail(true);
        machine.begin_attempt();
        machine.succeed();

        assert_eq!(machine.state(), RetryState::Success { attempts: 2 });
        assert_eq!(machine.begin_attempt(), None);
    }
}
