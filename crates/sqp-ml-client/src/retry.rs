//! Retry policy for segmentation service calls.
//!
//! Exponential backoff with full jitter, capped at a configurable maximum.
//! A `Retry-After` hint from the service overrides the computed delay.

use std::time::Duration;

use metrics::counter;
use rand::Rng;
use tracing::{info_span, warn, Instrument};

use crate::error::{MlError, MlResult};

/// Counter of retried segmentation requests, labelled by operation.
pub const RETRIES_TOTAL: &str = "sqp_segmenter_retries_total";

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("SEGMENTER_RETRIES").unwrap_or(defaults.max_retries),
            base_delay_ms: env_parse("SEGMENTER_RETRY_BASE_MS").unwrap_or(defaults.base_delay_ms),
            max_delay_ms: env_parse("SEGMENTER_RETRY_MAX_MS").unwrap_or(defaults.max_delay_ms),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Execute an async operation with retry.
///
/// Only errors for which [`MlError::is_retryable`] holds are retried.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> MlResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = MlResult<T>>,
{
    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        let span = info_span!("segmenter_retry", operation = %operation, attempt = attempt + 1);

        match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let delay = calculate_delay(config, attempt, e.retry_after_ms());

                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Segmentation request failed, retrying: {}",
                    e
                );
                counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| MlError::RequestFailed(format!("{}: no attempt made", operation))))
}

/// Backoff delay for `attempt` (0-based): full jitter over
/// `min(base * 2^attempt, max)`, never below `base`.
fn calculate_delay(config: &RetryConfig, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
    if let Some(after) = retry_after_ms {
        return Duration::from_millis(after.min(config.max_delay_ms));
    }

    let exp_delay = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    let capped_delay = exp_delay.min(config.max_delay_ms);

    let jittered = if capped_delay > 0 {
        rand::rng().random_range(0..=capped_delay)
    } else {
        0
    };

    Duration::from_millis(jittered.max(config.base_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 8000);
    }

    #[test]
    fn test_delay_honors_retry_after_up_to_cap() {
        let config = RetryConfig::default();
        assert_eq!(calculate_delay(&config, 0, Some(2000)), Duration::from_millis(2000));
        assert_eq!(calculate_delay(&config, 0, Some(60_000)), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_bounds() {
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 2000,
        };
        for attempt in [0, 1, 5, 40] {
            let delay = calculate_delay(&config, attempt, None);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let value = with_retry(&fast(), "create_session", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(MlError::ServiceUnavailable {
                    message: "warming up".into(),
                    retry_after_ms: None,
                })
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), "propagate", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(MlError::ServiceUnavailable {
                message: "busy".into(),
                retry_after_ms: Some(1),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, MlError::ServiceUnavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), "add_prompt", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(MlError::Api {
                status: 422,
                message: "bad prompt".into(),
            })
        })
        .await
        .unwrap_err();

        assert!(matches!(err, MlError::Api { status: 422, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
