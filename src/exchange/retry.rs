//! Retry decorator for transient exchange failures.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

/// Retry parameters for a single logical exchange call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (2 means up to 3 attempts total)
    pub retries: u32,

    /// Hard deadline applied to every individual attempt
    pub attempt_timeout: Duration,

    /// Backoff before the first retry; doubles per attempt
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            attempt_timeout: Duration::from_secs(8),
            base_backoff: Duration::from_millis(400),
        }
    }
}

/// Run `f` under the retry policy, racing every attempt against the
/// per-attempt timeout. A timed-out attempt counts as a transient failure.
/// Gives up after the final retry with the last error attached.
pub async fn retry_with_timeout<T, F, Fut>(op: &str, policy: &RetryPolicy, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.retries + 1;
    let mut last_err = None;

    for attempt in 0..attempts {
        match tokio::time::timeout(policy.attempt_timeout, f()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                warn!(op, attempt = attempt + 1, error = %err, "attempt failed");
                last_err = Some(err);
            }
            Err(_) => {
                warn!(
                    op,
                    attempt = attempt + 1,
                    timeout_ms = policy.attempt_timeout.as_millis() as u64,
                    "attempt timed out"
                );
                last_err = Some(anyhow::anyhow!(
                    "timed out after {:?}",
                    policy.attempt_timeout
                ));
            }
        }

        if attempt + 1 < attempts {
            let backoff = policy.base_backoff * 2u32.pow(attempt);
            tokio::time::sleep(backoff).await;
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts were made")))
        .with_context(|| format!("{} failed after {} attempts", op, attempts))
}
