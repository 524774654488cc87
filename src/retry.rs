//! Generic async retry-with-backoff helper, adapted from the reference
//! engine's `utils/http.rs::request_with_retry`: base 2s, doubling, capped
//! at 3 retries rather than an arbitrary ceiling, since every call site in
//! this engine is a model invocation with a fixed retry budget.

use std::future::Future;
use std::time::Duration;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(2);

/// Runs `task` up to `MAX_RETRIES + 1` times, doubling the delay between
/// attempts. Retries whenever `task` returns `Err`; the last error is
/// returned if every attempt fails.
pub async fn with_backoff<F, Fut, T, E>(mut task: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = BASE_DELAY;
    loop {
        match task().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(e);
                }
                tracing::warn!(attempt, ?delay, "model call failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_works() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_three_times_then_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("nope")
        })
        .await;
        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 4, "one initial attempt plus 3 retries");
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(|| async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("transient")
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
    }
}
