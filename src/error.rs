//! Error taxonomy (spec section 7). Kinds are named, never the raw
//! transport error types, so `RetryManager` and the reconciler can switch
//! on `category()` without downcasting.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing/invalid config or tokens. Fatal, aborts the run.
    Fatal,
    /// Connection reset/timeout/DNS. Retried with the "standard" schedule.
    Network,
    /// 5xx from a remote service. Retried with the "standard" schedule.
    ServerError,
    /// 429 from a remote service. Retried with the "aggressive" schedule.
    RateLimit,
    /// Other 4xx. Not retried.
    ClientError,
    /// Not retryable, not fatal; becomes a per-book outcome.
    Terminal,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous match: {0}")]
    AmbiguousMatch(String),

    #[error("regression blocked: {0}")]
    RegressionBlocked(String),

    #[error("remote mutation failed: {0}")]
    RemoteMutationFailed(String),

    #[error("cache write failed: {0}")]
    CacheWriteFailed(String),

    #[error("invalid progress input: {0}")]
    InvalidProgressInput(String),

    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::ConfigInvalid(_) => ErrorCategory::Fatal,
            SyncError::Connectivity(_) => ErrorCategory::Network,
            SyncError::RateLimited(_) => ErrorCategory::RateLimit,
            SyncError::NotFound(_) => ErrorCategory::Terminal,
            SyncError::AmbiguousMatch(_) => ErrorCategory::Terminal,
            SyncError::RegressionBlocked(_) => ErrorCategory::Terminal,
            SyncError::RemoteMutationFailed(_) => ErrorCategory::ServerError,
            SyncError::CacheWriteFailed(_) => ErrorCategory::Terminal,
            SyncError::InvalidProgressInput(_) => ErrorCategory::Terminal,
            SyncError::Cancelled => ErrorCategory::Terminal,
        }
    }

    /// Classify a transport-level failure raised while calling a remote
    /// service, for `RetryManager` to pick a backoff schedule from.
    pub fn classify_http(status: Option<u16>, is_timeout: bool, is_connect: bool) -> Self {
        if is_timeout || is_connect {
            return SyncError::Connectivity("network error contacting remote service".into());
        }
        match status {
            Some(429) => SyncError::RateLimited("remote service returned 429".into()),
            Some(s) if (500..600).contains(&s) => {
                SyncError::RemoteMutationFailed(format!("remote service returned {s}"))
            }
            Some(s) => SyncError::NotFound(format!("remote service returned {s}")),
            None => SyncError::Connectivity("no response from remote service".into()),
        }
    }
}
