//! Bounded fixed-interval retry.
//!
//! One primitive shared by the readiness probe and admin API calls: a maximum
//! attempt count (optional), a fixed interval between attempts and a terminal
//! deadline. There is no backoff; expected latencies are short and bounded.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of a single failed attempt
#[derive(Debug)]
pub enum Attempt<E> {
    /// Worth trying again after the interval
    Transient(E),
    /// Retrying cannot help; stop immediately
    Permanent(E),
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryExhausted<E> {
    Permanent(E),
    Exhausted { attempts: u32, elapsed: Duration, last_error: E },
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryExhausted::Permanent(err) => write!(f, "{}", err),
            RetryExhausted::Exhausted { attempts, elapsed, last_error } => write!(
                f,
                "gave up after {} attempts in {}ms: {}",
                attempts,
                elapsed.as_millis(),
                last_error
            ),
            RetryExhausted::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: Option<u32>,
    pub interval: Duration,
    pub deadline: Duration,
}

impl RetryPolicy {
    /// Poll at `interval` until `deadline` has elapsed
    pub fn fixed(interval: Duration, deadline: Duration) -> Self {
        Self { max_attempts: None, interval, deadline }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// A policy that tries exactly once
    pub fn once() -> Self {
        Self { max_attempts: Some(1), interval: Duration::ZERO, deadline: Duration::ZERO }
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts or
    /// time, or `cancel` fires. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, Attempt<E>>>,
    {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(RetryExhausted::Cancelled);
            }
            attempt += 1;

            let last_error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Permanent(err)) => return Err(RetryExhausted::Permanent(err)),
                Err(Attempt::Transient(err)) => err,
            };

            let elapsed = started.elapsed();
            let out_of_attempts = self.max_attempts.is_some_and(|max| attempt >= max);
            let out_of_time = elapsed + self.interval > self.deadline;
            if out_of_attempts || out_of_time {
                return Err(RetryExhausted::Exhausted { attempts: attempt, elapsed, last_error });
            }

            debug!(
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %last_error,
                "Attempt failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryExhausted::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_millis(5), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted<String>> = fast_policy()
            .run(&CancellationToken::new(), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Attempt::Transient(format!("refused #{attempt}")))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy()
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Attempt::Permanent("401 unauthorized".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(RetryExhausted::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_bound() {
        let policy = fast_policy().with_max_attempts(2);
        let result: Result<(), _> = policy
            .run(&CancellationToken::new(), |_| async {
                Err(Attempt::Transient("connection reset".to_string()))
            })
            .await;

        match result {
            Err(RetryExhausted::Exhausted { attempts, last_error, .. }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error, "connection reset");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_bound() {
        let policy = RetryPolicy::fixed(Duration::from_millis(20), Duration::from_millis(50));
        let started = std::time::Instant::now();
        let result: Result<(), _> = policy
            .run(&CancellationToken::new(), |_| async {
                Err(Attempt::Transient("not yet".to_string()))
            })
            .await;

        assert!(matches!(result, Err(RetryExhausted::Exhausted { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::fixed(Duration::from_secs(30), Duration::from_secs(60));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = policy
            .run(&cancel, |_| async { Err(Attempt::Transient("down".to_string())) })
            .await;

        assert!(matches!(result, Err(RetryExhausted::Cancelled)));
    }
}
