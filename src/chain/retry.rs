//! Bounded retry with exponential backoff
//!
//! Only transient (transport) failures are retried; decode and other
//! errors return on the first attempt.

use crate::error::TrackerResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request (including the first)
    pub attempts: u32,
    /// First retry delay; doubles on every further attempt
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Runs `op` until it succeeds, fails non-transiently, or attempts run out
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> TrackerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TrackerResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts || !e.is_transient() {
                        if e.is_transient() {
                            warn!("{} failed after {} attempts: {}", what, attempt, e);
                        }
                        return Err(e);
                    }
                    warn!("Retry {}/{} for {}: {}", attempt, attempts, what, e);
                    sleep(self.backoff * 2u32.saturating_pow(attempt - 1)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .run("eth_blockNumber", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TrackerError::Transport("429".into()))
                } else {
                    Ok(7u64)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: TrackerResult<()> = fast(2)
            .run("eth_call", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TrackerError::Transport("reset".into()))
            })
            .await;
        assert!(matches!(result, Err(TrackerError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_decode_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let result: TrackerResult<()> = fast(5)
            .run("positions", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TrackerError::Decode("short".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
