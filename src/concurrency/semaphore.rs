//! FIFO-fair counting semaphore. `tokio::sync::Semaphore` is already
//! FIFO-fair in its wait queue, so this wraps it rather than
//! reimplementing the waiter list.

use std::sync::Arc;

use tokio::sync::{Semaphore as TokioSemaphore, SemaphorePermit};

pub struct Semaphore {
    inner: Arc<TokioSemaphore>,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            inner: Arc::new(TokioSemaphore::new(permits)),
        }
    }

    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.inner
            .acquire()
            .await
            .expect("semaphore is never closed while a Semaphore handle exists")
    }

    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn respects_bound() {
        let sem = Semaphore::new(2);
        let _a = sem.acquire().await;
        let _b = sem.acquire().await;
        assert_eq!(sem.available_permits(), 0);
    }

    #[tokio::test]
    async fn releases_on_drop() {
        let sem = Semaphore::new(1);
        {
            let _permit = sem.acquire().await;
            assert_eq!(sem.available_permits(), 0);
        }
        assert_eq!(sem.available_permits(), 1);
    }
}
