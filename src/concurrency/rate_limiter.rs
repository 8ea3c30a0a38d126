//! Per-service token-bucket rate limiting (section 4.5).
//!
//! Each named service (e.g. `"audiobookshelf"`, `"hardcover"`) gets its
//! own isolated bucket so a burst against one API never throttles calls
//! against the other. Built on `governor`, the same crate the
//! concurrency-heavy examples in the corpus reach for token-bucket
//! limiting rather than hand-rolling a leaky bucket.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovernorLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};

type Bucket = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            burst: 5,
        }
    }
}

/// Warn once utilization within a window crosses this fraction of the
/// configured burst capacity, so operators get a heads-up before a run
/// starts actually waiting on the limiter.
const UTILIZATION_WARNING_FRACTION: f64 = 0.8;

struct ServiceState {
    bucket: Bucket,
    config: RateLimiterConfig,
}

/// Isolates a token bucket per named external service.
pub struct RateLimiter {
    services: DashMap<String, Arc<ServiceState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    fn service(&self, name: &str, config: RateLimiterConfig) -> Arc<ServiceState> {
        if let Some(existing) = self.services.get(name) {
            return existing.clone();
        }
        let rps = NonZeroU32::new(config.requests_per_second.max(1)).unwrap();
        let burst = NonZeroU32::new(config.burst.max(1)).unwrap();
        let quota = Quota::per_second(rps).allow_burst(burst);
        let state = Arc::new(ServiceState {
            bucket: GovernorLimiter::direct(quota),
            config,
        });
        self.services.insert(name.to_string(), state.clone());
        state
    }

    /// Blocks the caller until a token is available for `service`,
    /// registering the service's quota on first use.
    pub async fn wait_if_needed(&self, service: &str, config: RateLimiterConfig) {
        let state = self.service(service, config);
        match state.bucket.check() {
            Ok(()) => {}
            Err(_) => {
                tracing::debug!(service, "rate limit reached, waiting for next token");
                state.bucket.until_ready().await;
            }
        }
        self.warn_if_saturated(service, &state);
    }

    fn warn_if_saturated(&self, service: &str, state: &ServiceState) {
        // `governor` doesn't expose remaining capacity directly for a
        // direct limiter; approximate utilization by re-probing.
        let probe = state.bucket.check();
        if probe.is_err() {
            let threshold = (state.config.burst as f64 * UTILIZATION_WARNING_FRACTION) as u32;
            tracing::warn!(
                service,
                burst = state.config.burst,
                threshold,
                "rate limiter near capacity"
            );
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn isolates_buckets_per_service() {
        let limiter = RateLimiter::new();
        let cfg = RateLimiterConfig {
            requests_per_second: 100,
            burst: 1,
        };
        limiter.wait_if_needed("abs", cfg).await;
        // a second service should not be affected by the first's
        // exhausted burst.
        limiter.wait_if_needed("hardcover", cfg).await;
        assert_eq!(limiter.services.len(), 2);
    }

    #[tokio::test]
    async fn reuses_existing_bucket_for_same_service() {
        let limiter = RateLimiter::new();
        let cfg = RateLimiterConfig::default();
        limiter.wait_if_needed("abs", cfg).await;
        limiter.wait_if_needed("abs", cfg).await;
        assert_eq!(limiter.services.len(), 1);
    }
}
