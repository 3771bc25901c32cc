//! Exponential backoff with jitter for operations that fail transiently
//!
//! Used for catalog index downloads and for the platform agent liveness
//! check during teardown. Generic object store errors are not retried here;
//! the controller requeues on them.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{error, warn};

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Stop retrying once this much time has passed since the first attempt
    pub max_elapsed: Option<Duration>,
}

impl RetryConfig {
    /// Catalog index downloads: four attempts within 30 seconds.
    pub fn catalog_index() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_elapsed: Some(Duration::from_secs(30)),
        }
    }

    /// Platform agent liveness: starts at 10s and gives up after ~3 minutes.
    pub fn liveness() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_elapsed: Some(Duration::from_secs(180)),
        }
    }

    /// Single attempt, no sleeping
    pub fn immediate() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_elapsed: None,
        }
    }

    fn exhausted(&self, attempt: u32, started: Instant) -> bool {
        if self.max_attempts > 0 && attempt >= self.max_attempts {
            return true;
        }
        self.max_elapsed
            .is_some_and(|budget| started.elapsed() >= budget)
    }
}

/// Runs `operation` until it succeeds or the retry budget is spent, sleeping
/// 0.5x..1.5x of the current delay between attempts. Returns the last error
/// once exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if config.exhausted(attempt, started) {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after retries"
                    );
                    return Err(e);
                }

                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
