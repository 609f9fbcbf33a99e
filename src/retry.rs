//! Retry utilities with exponential backoff.
//!
//! Used by the Agent Loop to retry transient provider errors (network
//! failures, 429/5xx responses, timeouts) while letting non-retryable
//! errors (auth, bad request, content policy) surface immediately.
//!
//! # Examples
//!
//! ```rust,no_run
//! use gadget_agent::retry::{retry_with_backoff, RetryConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(std::time::Duration::from_secs(1));
//!
//! let result = retry_with_backoff(config, || async {
//!     Ok::<_, gadget_agent::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Whether retry is enabled at all (the Agent Loop's `retry.enabled`
    /// configuration option).
    pub enabled: bool,

    /// Maximum number of attempts (first try + retries).
    pub max_attempts: u32,

    /// Initial delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (e.g. 2.0 doubles the delay each time).
    pub backoff_multiplier: f64,

    /// Random jitter factor applied around the capped delay (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 4, // 1 initial try + 3 retries, matching the spec's default `retries: 3`
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Public wrapper over [`Self::calculate_delay`] for callers (the Agent
    /// Loop's retry-attempt hook) that need to report the delay they're
    /// about to sleep for before actually sleeping.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.calculate_delay(attempt)
    }

    /// Calculate delay for a given attempt with exponential backoff and jitter.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);

        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);

        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Retry an async operation with exponential backoff, unconditionally on
/// every error.
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    let attempts = if config.enabled { config.max_attempts } else { 1 };

    for attempt in 0..attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                last_error = Some(err);
                if attempt < attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}

/// Retry classification following the Agent Loop's §4.8 rules: retryable
/// on rate limiting, server overload, timeouts, connection resets, and a
/// small set of provider error names; non-retryable on auth, bad request,
/// not-found, permission-denied, and content-policy errors. Matching is a
/// case-insensitive substring match against the error's display text,
/// since Rust errors don't carry a separate provider-assigned error name.
pub fn is_retryable_error(error: &Error) -> bool {
    let message = error.to_string().to_lowercase();

    const NON_RETRYABLE_MARKERS: &[&str] = &[
        "authenticationerror",
        "badrequesterror",
        "notfounderror",
        "permissiondeniederror",
        "content-policy",
        "content_policy",
        "401",
        "403",
        "400",
        "404",
    ];
    if NON_RETRYABLE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        return false;
    }

    match error {
        Error::Http(_) | Error::Timeout | Error::Stream(_) => true,
        Error::Config(_) | Error::InvalidInput(_) => false,
        _ => {
            const RETRYABLE_MARKERS: &[&str] = &[
                "429",
                "500",
                "502",
                "503",
                "504",
                "rate limit",
                "overloaded",
                "timeout",
                "connection reset",
                "connection refused",
                "apiconnectionerror",
                "ratelimiterror",
                "internalservererror",
                "serviceunavailableerror",
                "apitimeouterror",
            ];
            RETRYABLE_MARKERS.iter().any(|marker| message.contains(marker))
        }
    }
}

/// Retry an async operation with exponential backoff, stopping immediately
/// on a non-retryable error instead of exhausting all attempts.
pub async fn retry_with_backoff_conditional<F, Fut, T>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    let attempts = if config.enabled { config.max_attempts } else { 1 };

    for attempt in 0..attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable_error(&err) {
                    return Err(err);
                }
                last_error = Some(err);
                if attempt < attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("Retry failed with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.2);
    }

    #[test]
    fn test_calculate_delay_grows_exponentially() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter_factor(0.0);

        let delay0 = config.calculate_delay(0);
        let delay1 = config.calculate_delay(1);
        let delay2 = config.calculate_delay(2);

        assert!(delay1 > delay0);
        assert!(delay2 > delay1);
    }

    #[tokio::test]
    async fn test_retry_success_on_first_attempt() {
        let config = RetryConfig::new().with_max_attempts(3);
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff(config, move || {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<i32, Error>(42) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(5));
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff(config, move || {
            let count = count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(Error::timeout())
                } else {
                    Ok::<i32, Error>(42)
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(call_count.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(5));
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff(config, move || {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err::<i32, Error>(Error::timeout()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_conditional_retry_stops_on_non_retryable() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(5));
        let call_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let count_clone = call_count.clone();

        let result = retry_with_backoff_conditional(config, move || {
            count_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err::<i32, Error>(Error::invalid_input("bad")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(call_count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::timeout()));
        assert!(is_retryable_error(&Error::api(
            "500 Internal Server Error".to_string()
        )));
        assert!(is_retryable_error(&Error::api("rate limit hit".to_string())));
        assert!(is_retryable_error(&Error::api(
            "connection reset by peer".to_string()
        )));
        assert!(!is_retryable_error(&Error::config("Invalid config".to_string())));
        assert!(!is_retryable_error(&Error::invalid_input("Bad input".to_string())));
        assert!(!is_retryable_error(&Error::api(
            "401 AuthenticationError".to_string()
        )));
        assert!(!is_retryable_error(&Error::api(
            "content-policy violation".to_string()
        )));
    }
}
