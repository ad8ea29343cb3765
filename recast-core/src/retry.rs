use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::config::PipelineSection;
use crate::error::{Categorize, ConfigError};

/// Bounded retry with exponential backoff and uniform jitter. Only errors
/// whose category is transient are retried; everything else propagates on
/// the spot without consuming an attempt. The final failure is returned
/// unchanged, never swallowed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_tries: u32,
    initial_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    pub fn new(
        max_tries: u32,
        initial_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self, ConfigError> {
        if max_tries == 0 {
            return Err(ConfigError::Invalid {
                field: "max_tries",
                reason: "must be at least 1".to_string(),
            });
        }
        if initial_delay.is_zero() {
            return Err(ConfigError::Invalid {
                field: "initial_delay",
                reason: "must be greater than zero".to_string(),
            });
        }
        if backoff_factor < 1.0 {
            return Err(ConfigError::Invalid {
                field: "backoff_factor",
                reason: format!("{backoff_factor} is below 1.0"),
            });
        }
        Ok(Self {
            max_tries,
            initial_delay,
            backoff_factor,
        })
    }

    pub fn from_section(max_tries: u32, section: &PipelineSection) -> Result<Self, ConfigError> {
        Self::new(
            max_tries,
            Duration::from_secs(section.retry_initial_delay_seconds),
            section.retry_backoff_factor,
        )
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    pub async fn run<F, Fut, T, E>(&self, stage: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Categorize + fmt::Display,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(stage, attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.category().is_retryable() && attempt < self.max_tries => {
                    let wait = jittered(delay);
                    tracing::warn!(
                        stage,
                        attempt,
                        remaining = self.max_tries - attempt,
                        wait = ?wait,
                        error = %error,
                        "retrying after transient failure"
                    );
                    sleep(wait).await;
                    delay = delay.mul_f64(self.backoff_factor);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// `delay * (1 + U(0, 0.5))`: up to half the current delay of extra wait,
/// so simultaneous schedules drift apart instead of hammering in lockstep.
fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..0.5);
    delay.mul_f64(factor)
}
