//! Common utilities shared by the engine and drivers
//!
//! Polling primitives used by element lookup and condition evaluation.

use std::future::Future;
use tokio::time::{Duration, Instant};

// ============================================================================
// Polling Utilities
// ============================================================================

/// Configuration for polling operations
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10000,
            interval_ms: 100,
        }
    }
}

impl PollConfig {
    pub fn new(timeout_ms: u64, interval_ms: u64) -> Self {
        Self {
            timeout_ms,
            interval_ms,
        }
    }
}

/// Poll `attempt` at a fixed interval until it yields a value or the timeout elapses
///
/// The first attempt always runs, even with a zero timeout. Errors from
/// `attempt` abort the poll immediately. Returns `Ok(None)` on timeout.
pub async fn poll_until<T, E, F, Fut>(config: PollConfig, mut attempt: F) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let timeout = Duration::from_millis(config.timeout_ms);
    let interval = Duration::from_millis(config.interval_ms);

    loop {
        if let Some(value) = attempt().await? {
            return Ok(Some(value));
        }

        if start.elapsed() >= timeout {
            return Ok(None);
        }

        tokio::time::sleep(interval).await;
    }
}

/// Generic polling function for plain boolean checks
///
/// Calls `check_fn` repeatedly until it returns `true` or timeout is reached.
pub async fn wait_until<F, Fut>(check_fn: F, config: PollConfig) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result: Result<Option<()>, std::convert::Infallible> = poll_until(config, || {
        let fut = check_fn();
        async move { Ok(fut.await.then_some(())) }
    })
    .await;

    matches!(result, Ok(Some(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_runs_at_least_once() {
        let calls = AtomicU32::new(0);
        let result: Result<Option<u32>, ()> = poll_until(PollConfig::new(0, 100), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(None) }
        })
        .await;

        assert_eq!(result, Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_returns_first_value() {
        let calls = AtomicU32::new(0);
        let result: Result<Option<u32>, ()> = poll_until(PollConfig::new(5000, 100), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok((n == 3).then_some(n)) }
        })
        .await;

        assert_eq!(result, Ok(Some(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_propagates_error() {
        let result: Result<Option<u32>, &str> =
            poll_until(PollConfig::new(5000, 100), || async { Err("boom") }).await;
        assert_eq!(result, Err("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out() {
        let start = Instant::now();
        assert!(!wait_until(|| async { false }, PollConfig::new(1000, 100)).await);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
