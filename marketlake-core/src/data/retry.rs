//! Retry policy with exponential backoff and jitter.
//!
//! Shared by the extractor (HTTP calls) and the raw loader (merge
//! transactions). The caller classifies errors; only retryable ones are
//! attempted again.
//!
//! Delay before attempt n (n >= 2) = min(base * 2^(n-2), max) scaled by a
//! uniform factor in [1 - jitter, 1 + jitter].

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay randomised in either direction (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error the classifier refused to retry.
    #[error("{0}")]
    Permanent(E),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent(e) => e,
            Self::Exhausted { last, .. } => last,
        }
    }

    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Permanent(_) => None,
            Self::Exhausted { attempts, .. } => Some(*attempts),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits; used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Un-jittered delay before `attempt` (1-based; attempt 1 has no delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(31);
        let scaled = self.base_delay.saturating_mul(1u32 << exp);
        scaled.min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        base.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 1-based attempt number.
    pub fn run<T, E>(
        &self,
        op: impl FnMut(u32) -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryError<E>> {
        self.run_with_sleep(op, is_retryable, std::thread::sleep)
    }

    /// Same as [`run`](Self::run) with an injectable sleep.
    pub fn run_with_sleep<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T, RetryError<E>> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= max => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(_) => {
                    attempt += 1;
                    let delay = self.jittered(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                    sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy(5);
        assert_eq!(p.backoff(1), Duration::ZERO);
        assert_eq!(p.backoff(2), Duration::from_millis(100));
        assert_eq!(p.backoff(3), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(250));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut slept = Vec::new();
        let result: Result<u32, RetryError<&str>> = policy(3).run_with_sleep(
            |attempt| if attempt < 3 { Err("busy") } else { Ok(attempt) },
            |_| true,
            |d| slept.push(d),
        );
        assert_eq!(result.unwrap(), 3);
        assert_eq!(slept, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn exhausts_at_ceiling() {
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = policy(3).run_with_sleep(
            |_| {
                calls += 1;
                Err("busy")
            },
            |_| true,
            |_| {},
        );
        assert_eq!(calls, 3);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, "busy");
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = policy(5).run_with_sleep(
            |_| {
                calls += 1;
                Err("no such table")
            },
            |e| *e != "no such table",
            |_| {},
        );
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(RetryError::Permanent("no such table"))));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let p = RetryPolicy {
            jitter: 0.5,
            ..policy(3)
        };
        for _ in 0..50 {
            let d = p.jittered(2);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(150));
        }
    }
}
