//! Bounded retry for throttled or timed-out remote calls.

use std::future::Future;
use tracing::warn;

use crate::config::Retry;
use crate::error::SyncError;

/// Retry a call on rate limits and timeouts with bounded exponential
/// backoff. A server-advertised Retry-After wins when it is larger than the
/// scheduled delay. Non-retryable errors pass straight through.
pub async fn with_retry<T, F, Fut>(retry: &Retry, mut operation: F) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                let scheduled = retry.delay_for(attempt);
                let delay = err
                    .retry_after()
                    .map(|advertised| advertised.max(scheduled))
                    .unwrap_or(scheduled);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retryable failure; backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
