// ABOUTME: Explicit retry policy for sandbox infrastructure calls
// ABOUTME: Bounded attempts with exponential backoff over a pluggable retryable-error classifier

use crate::providers::ProviderError;
use automa_config::RetryConfig;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub type Classifier = Arc<dyn Fn(&ProviderError) -> bool + Send + Sync>;

/// Why a retried operation gave up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError {
    /// Every attempt failed with a retryable error
    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { last: ProviderError, attempts: u32 },

    /// An attempt failed with an error the classifier rejected
    #[error("Non-retryable failure on attempt {attempts}: {error}")]
    Fatal { error: ProviderError, attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Fatal { attempts, .. } => *attempts,
        }
    }

    pub fn provider_error(&self) -> &ProviderError {
        match self {
            Self::Exhausted { last, .. } => last,
            Self::Fatal { error, .. } => error,
        }
    }
}

/// Retry policy passed into every sandbox run.
///
/// Delay before attempt `n + 1` is `min(initial_delay * backoff_factor^(n - 1), max_delay)`.
/// No jitter is applied so schedules are reproducible in tests.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    classifier: Classifier,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_factor,
            max_delay,
            classifier: Arc::new(ProviderError::is_retryable),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_delay,
            config.backoff_factor,
            config.max_delay,
        )
    }

    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Replace the retryable-error classifier
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&ProviderError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn is_retryable(&self, error: &ProviderError) -> bool {
        (self.classifier)(error)
    }

    /// Delay slept after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(self.backoff_factor)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `op` until it succeeds, fails with a non-retryable error or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    /// Returns the value together with the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<(T, u32), RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = AtomicU32::new(0);
        let mut schedule = self.schedule();
        schedule.reset();

        let outcome = backoff::future::retry_notify(
            schedule,
            || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let call = op(attempt);
                let retryable = self.classifier.clone();
                let budget = self.max_attempts;
                async move {
                    match call.await {
                        Ok(value) => Ok(value),
                        Err(e) if attempt < budget && retryable(&e) => {
                            Err(backoff::Error::transient(e))
                        }
                        Err(e) => Err(backoff::Error::permanent(e)),
                    }
                }
            },
            |error: ProviderError, delay: Duration| {
                warn!(
                    attempt = attempts.load(Ordering::SeqCst),
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Sandbox infrastructure call failed, retrying"
                );
            },
        )
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match outcome {
            Ok(value) => Ok((value, attempts)),
            Err(error) if self.is_retryable(&error) => {
                warn!(attempts, error = %error, "Sandbox infrastructure retries exhausted");
                Err(RetryError::Exhausted {
                    last: error,
                    attempts,
                })
            }
            Err(error) => Err(RetryError::Fatal { error, attempts }),
        }
    }
}
