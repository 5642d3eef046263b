//! Small retry helper with a fixed delay between attempts.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` up to `max_attempts` times, sleeping `delay` between attempts.
/// Only errors for which `retryable` returns true are retried; the last
/// error is returned once attempts are exhausted.
pub async fn retry<T, E, F, Fut, P>(
    mut op: F,
    max_attempts: u32,
    delay: Duration,
    mut retryable: P,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && retryable(&err) => {
                warn!(%err, attempt, max_attempts, "attempt failed; retrying");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let calls = Cell::new(0);
        let result: Result<i32, String> = retry(
            || {
                calls.set(calls.get() + 1);
                async { Ok(7) }
            },
            3,
            Duration::from_secs(1),
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_then_succeeds() {
        let calls = Cell::new(0);
        let result: Result<i32, String> = retry(
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err("connection reset".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
            3,
            Duration::from_secs(1),
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = Cell::new(0);
        let result: Result<i32, String> = retry(
            || {
                calls.set(calls.get() + 1);
                async { Err("timeout".to_string()) }
            },
            3,
            Duration::from_secs(1),
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap_err(), "timeout");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<i32, String> = retry(
            || {
                calls.set(calls.get() + 1);
                async { Err("rejected".to_string()) }
            },
            3,
            Duration::from_secs(1),
            |err: &String| err != "rejected",
        )
        .await;
        assert_eq!(result.unwrap_err(), "rejected");
        assert_eq!(calls.get(), 1);
    }
}
