//! Component E — concurrency primitives (section 4.5): a fair semaphore,
//! a per-service rate limiter, a bounded-concurrency task queue, and a
//! retry manager. The reconciler composes these rather than managing
//! tokio tasks directly.

pub mod rate_limiter;
pub mod retry;
pub mod semaphore;
pub mod task_queue;

pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{BackoffProfile, RetryConfig, RetryManager};
pub use semaphore::Semaphore;
pub use task_queue::{Aborted, TaskQueue};
