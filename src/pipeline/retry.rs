use std::fmt::Display;
use std::time::Duration;

use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay after the `attempt`-th failure (1-based): `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{label} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub label: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Errors that know whether another attempt could help.
pub trait Retryable: Display {
    fn is_transient(&self) -> bool;
}

/// Run `op` until it succeeds, returns a non-transient error, or attempts run out.
/// `sleep` is injected so tests do not wait.
pub fn run_with_retry<T, E, F, S>(
    policy: &RetryPolicy,
    label: &str,
    mut sleep: S,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    E: Retryable,
    F: FnMut(u32) -> Result<T, E>,
    S: FnMut(Duration),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(err) => {
                let transient = err.is_transient();
                if !transient || attempt >= policy.max_attempts {
                    return Err(RetryExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                sleep(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fail(bool);

    impl Display for Fail {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fail(transient={})", self.0)
        }
    }

    impl Retryable for Fail {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn policy(n: u32) -> RetryPolicy {
        RetryPolicy::new(n, Duration::from_millis(100), Duration::from_millis(350))
    }

    #[test]
    fn delays_double_and_cap() {
        let p = policy(5);
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(350));
        assert_eq!(p.delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut slept = Vec::new();
        let out = run_with_retry(&policy(3), "refine", |d| slept.push(d), |attempt| {
            if attempt < 3 {
                Err(Fail(true))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(out, Ok(3));
        assert_eq!(
            slept,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[test]
    fn exhaustion_carries_attempts_and_last_error() {
        let mut calls = 0;
        let out: Result<(), _> = run_with_retry(&policy(3), "refine", |_| {}, |_| {
            calls += 1;
            Err(Fail(true))
        });
        let err = out.expect_err("exhausted");
        assert_eq!(calls, 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "fail(transient=true)");
    }

    #[test]
    fn permanent_error_stops_immediately() {
        let mut calls = 0;
        let out: Result<(), _> = run_with_retry(&policy(5), "extract", |_| {}, |_| {
            calls += 1;
            Err(Fail(false))
        });
        assert_eq!(calls, 1);
        assert_eq!(out.expect_err("permanent").attempts, 1);
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }
}
