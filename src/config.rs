//! Configuration for HTTP transport and check retries.

use std::time::Duration;

/// Shared HTTP client configuration for provider calls.
///
/// Both the classification call and the agent call run with a bounded
/// timeout; expiry surfaces as a timeout [`ProviderError`] and is handled
/// fail-closed by the check engine.
///
/// [`ProviderError`]: crate::error::ProviderError
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds. `None` disables the timeout.
    pub timeout_secs: Option<u64>,
    /// User agent string.
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(120),
            user_agent: None,
        }
    }
}

impl HttpClientConfig {
    /// Build a reqwest client with this configuration.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn build_client(&self) -> reqwest::Client {
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        if let Some(ref user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        builder.build().expect("failed to build HTTP client")
    }
}

/// Retry policy for classification calls that fail with a transient error.
///
/// Whether to retry before treating a check as fail-closed is left to the
/// operator, so the default is a single attempt. Only errors reporting
/// [`is_retryable`](crate::error::ProviderError::is_retryable) are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Exponential backoff multiplier applied per retry.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to retry delays.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with the given number of total attempts and default backoff.
    #[must_use]
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// Whether this policy allows any retry at all.
    #[must_use]
    pub const fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Calculate the delay before retry number `attempt` (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = if self.jitter {
            // Up to 25% jitter keeps concurrent retries from aligning.
            base + base * 0.25 * rand_factor()
        } else {
            base
        };
        Duration::from_millis(delay_ms as u64)
    }
}

/// Generate a pseudo-random factor between 0.0 and 1.0.
fn rand_factor() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_default() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout_secs, Some(120));
        assert!(config.user_agent.is_none());
    }

    #[test]
    fn test_retry_policy_default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.retries_enabled());
    }

    #[test]
    fn test_retry_policy_backoff_without_jitter() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0).as_millis(), 100);
        assert_eq!(policy.delay_for_attempt(1).as_millis(), 200);
        assert_eq!(policy.delay_for_attempt(2).as_millis(), 400);
    }

    #[test]
    fn test_with_attempts() {
        let policy = RetryPolicy::with_attempts(4);
        assert_eq!(policy.max_attempts, 4);
        assert!(policy.retries_enabled());
    }
}
