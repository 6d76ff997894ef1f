//! Retry helper with exponential backoff and cooperative cancellation (§4.3).

use std::future::Future;
use std::time::Duration;

use llmsforge_shared::{PipelineError, Result};
use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Consulted before every attempt; returning `true` aborts the retry loop
/// with a [`PipelineError::Cancelled`] regardless of how many attempts remain.
pub trait CancellationCheck: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

impl<F> CancellationCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// Runs `op` up to `max_attempts` times, backing off
/// `initial_delay * 2^(attempt - 1) * (1 + jitter)` between attempts, where
/// `jitter` is uniform in `[0, 0.2)`. Non-retriable errors
/// ([`PipelineError::is_retriable`] false) and cancellation propagate
/// immediately without consuming an attempt on cancellation. `description`
/// and `task_id` are carried into log lines and the cancellation error only.
pub async fn retry<T, F, Fut>(
    mut op: F,
    max_attempts: u32,
    initial_delay: Duration,
    description: &str,
    task_id: Option<&str>,
    cancellation: Option<&dyn CancellationCheck>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        if let Some(check) = cancellation {
            if check.is_cancelled() {
                return Err(PipelineError::cancelled(
                    task_id.unwrap_or(description).to_string(),
                ));
            }
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retriable() => {
                tracing::debug!(description, %err, "non-retriable error, giving up");
                return Err(err);
            }
            Err(err) => {
                if attempt >= max_attempts {
                    tracing::warn!(description, attempt, max_attempts, %err, "retry attempts exhausted");
                    return Err(err);
                }
                let exponent = (attempt - 1) as i32;
                let backoff = initial_delay.mul_f64(2f64.powi(exponent));
                let jitter: f64 = rand::thread_rng().gen_range(0.0..0.2);
                let delay = backoff.mul_f64(1.0 + jitter);
                tracing::debug!(description, attempt, ?delay, %err, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
