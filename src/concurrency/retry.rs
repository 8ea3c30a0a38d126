//! Retry/backoff policy (section 4.5), driven off `SyncError::category()`
//! so retry behavior stays centralized instead of re-decided at every
//! call site.

use std::time::Duration;

use crate::error::{ErrorCategory, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffProfile {
    Conservative,
    Standard,
    Aggressive,
}

impl BackoffProfile {
    fn base_delay_ms(self) -> u64 {
        match self {
            BackoffProfile::Conservative => 500,
            BackoffProfile::Standard => 1_000,
            BackoffProfile::Aggressive => 2_000,
        }
    }

    fn max_delay_ms(self) -> u64 {
        match self {
            BackoffProfile::Conservative => 60_000,
            BackoffProfile::Standard => 15_000,
            BackoffProfile::Aggressive => 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub profile: BackoffProfile,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            profile: BackoffProfile::Standard,
        }
    }
}

/// Exponential backoff with the profile's base/max delay, keyed off
/// attempt number (0-based).
pub fn backoff_delay(profile: BackoffProfile, attempt: u32) -> Duration {
    let base = profile.base_delay_ms();
    let max = profile.max_delay_ms();
    let scaled = base.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(scaled.min(max))
}

pub fn is_retryable(category: ErrorCategory) -> bool {
    matches!(
        category,
        ErrorCategory::Network | ErrorCategory::ServerError | ErrorCategory::RateLimit
    )
}

/// Drives a fallible async operation through the configured retry
/// policy, classifying failures via [`SyncError::category`] to decide
/// whether to retry and how long to wait.
pub struct RetryManager {
    config: RetryConfig,
}

/// Section 4.5: `rate_limit` uses the aggressive schedule, network and
/// server errors use the standard one. `config.profile` is the fallback
/// for any other retryable category that might be added later.
fn profile_for(category: ErrorCategory, fallback: BackoffProfile) -> BackoffProfile {
    match category {
        ErrorCategory::RateLimit => BackoffProfile::Aggressive,
        ErrorCategory::Network | ErrorCategory::ServerError => BackoffProfile::Standard,
        _ => fallback,
    }
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SyncError>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let category = err.category();
                    if !is_retryable(category) || attempt >= self.config.max_retries {
                        return Err(err);
                    }
                    let profile = profile_for(category, self.config.profile);
                    let delay = backoff_delay(profile, attempt);
                    tracing::warn!(
                        attempt,
                        ?category,
                        ?profile,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let d0 = backoff_delay(BackoffProfile::Standard, 0);
        let d1 = backoff_delay(BackoffProfile::Standard, 1);
        let d_large = backoff_delay(BackoffProfile::Standard, 30);
        assert!(d1 > d0);
        assert_eq!(d_large, Duration::from_millis(15_000));
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_max() {
        let manager = RetryManager::new(RetryConfig {
            max_retries: 2,
            profile: BackoffProfile::Aggressive,
        });
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = manager
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::Connectivity("boom".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let manager = RetryManager::new(RetryConfig::default());
        let calls = AtomicU32::new(0);
        let result: Result<(), SyncError> = manager
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SyncError::AmbiguousMatch("too many candidates".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
