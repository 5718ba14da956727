//! Bounded exponential backoff for Graph API calls.
//!
//! A [`RetryState`] belongs to exactly one account and is threaded through
//! every call made for that account, so the retry ceiling is an account-wide
//! budget and delays never shrink between consecutive retries.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

use crate::error::{GraphError, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed per account on top of each call's first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to every backoff.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

/// Per-account retry bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryState {
    delays: Vec<Duration>,
    deadline: Option<Instant>,
}

impl RetryState {
    pub fn new(deadline: Option<Instant>) -> Self {
        Self {
            delays: Vec::new(),
            deadline,
        }
    }

    /// Number of retries performed so far.
    pub fn retries(&self) -> u32 {
        self.delays.len() as u32
    }

    /// Backoff delays slept so far, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

impl RetryPolicy {
    /// Delay before the next retry: `base * 2^retries`, capped, plus jitter,
    /// and never shorter than the previous delay.
    pub fn next_delay(&self, state: &RetryState) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(state.retries()))
            .min(self.max_delay);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        let prev = state.delays.last().copied().unwrap_or(Duration::ZERO);
        (exp + jitter).max(prev)
    }

    /// Run `op` until it succeeds, fails permanently, or the account's retry
    /// budget (count or deadline) is spent. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, state: &mut RetryState, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            let err: GraphError = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if state.retries() >= self.max_retries {
                warn!(op = op_name, retries = state.retries(), error = %err, "Retry budget exhausted");
                return Err(err);
            }

            let delay = self.next_delay(state);
            if let Some(remaining) = state.remaining() {
                if delay >= remaining {
                    warn!(
                        op = op_name,
                        delay_ms = delay.as_millis() as u64,
                        remaining_ms = remaining.as_millis() as u64,
                        error = %err,
                        "Backoff would exceed run deadline, giving up"
                    );
                    return Err(err);
                }
            }

            state.delays.push(delay);
            warn!(
                op = op_name,
                attempt = state.retries(),
                delay_ms = delay.as_millis() as u64,
                rate_limited = err.is_rate_limit(),
                error = %err,
                "Transient Graph API error, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_jitter: Duration::ZERO,
        }
    }

    fn rate_limited() -> GraphError {
        GraphError::RateLimited {
            status: 429,
            message: "throttled".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let mut state = RetryState::new(None);

        let value = policy(3)
            .run(&mut state, "test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(state.retries(), 2);
        assert_eq!(
            state.delays(),
            &[Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let mut state = RetryState::new(None);

        let err = policy(3)
            .run(&mut state, "test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(GraphError::Unauthorized {
                    status: 401,
                    message: "bad token".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, GraphError::Unauthorized { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_shared_across_calls() {
        let mut state = RetryState::new(None);
        let p = policy(3);

        let first = AtomicU32::new(0);
        p.run(&mut state, "first", || async {
            if first.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(rate_limited())
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        let err = p
            .run(&mut state, "second", || async { Err::<(), _>(rate_limited()) })
            .await
            .unwrap_err();

        assert!(err.is_rate_limit());
        assert_eq!(state.retries(), 3, "retries never exceed the ceiling");
    }

    #[tokio::test(start_paused = true)]
    async fn delays_are_capped_and_non_decreasing() {
        let mut state = RetryState::new(None);
        let p = RetryPolicy {
            max_jitter: Duration::from_millis(50),
            ..policy(6)
        };

        let _ = p
            .run(&mut state, "test", || async { Err::<(), _>(rate_limited()) })
            .await;

        assert_eq!(state.retries(), 6);
        for pair in state.delays().windows(2) {
            assert!(pair[0] <= pair[1], "delays must not shrink: {:?}", state.delays());
        }
        for d in state.delays() {
            assert!(*d <= Duration::from_millis(400));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_backoff_exceeds_deadline() {
        let deadline = Instant::now() + Duration::from_millis(250);
        let mut state = RetryState::new(Some(deadline));

        let err = policy(5)
            .run(&mut state, "test", || async { Err::<(), _>(rate_limited()) })
            .await
            .unwrap_err();

        assert!(err.is_rate_limit());
        // 100ms fits, then 200ms would overrun the remaining 150ms.
        assert_eq!(state.retries(), 1);
    }
}
