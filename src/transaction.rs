//! Component I — Transaction.
//!
//! A LIFO rollback helper for sequences of remote mutations that have no
//! real database transaction to lean on (the remote book-tracking
//! service has no multi-step commit). Each step registers both its
//! forward action and how to undo it; if a later step fails, everything
//! committed so far is unwound in reverse order.

use std::future::Future;
use std::pin::Pin;

type AsyncOp = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

struct CompletedStep {
    label: &'static str,
    rollback: Box<dyn FnOnce() -> AsyncOp + Send>,
}

#[derive(Default)]
pub struct Transaction {
    completed: Vec<CompletedStep>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action`; on success records `rollback` for later unwinding.
    /// On failure, nothing is added to the undo stack (the step never
    /// took effect) and the error is returned immediately.
    pub async fn add<A, AFut, R, RFut>(
        &mut self,
        label: &'static str,
        action: A,
        rollback: R,
    ) -> anyhow::Result<()>
    where
        A: FnOnce() -> AFut,
        AFut: Future<Output = anyhow::Result<()>>,
        R: FnOnce() -> RFut + Send + 'static,
        RFut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        action().await?;
        self.completed.push(CompletedStep {
            label,
            rollback: Box::new(move || Box::pin(rollback())),
        });
        Ok(())
    }

    /// All steps succeeded; discards the undo stack without running it.
    pub fn commit(mut self) {
        self.completed.clear();
    }

    /// Unwinds every completed step in reverse order. Runs every
    /// rollback even if one fails, then returns the first error
    /// encountered (later rollback failures are logged, not lost
    /// silently, but don't replace the first failure as the reported
    /// cause).
    pub async fn rollback(mut self) -> anyhow::Result<()> {
        let mut first_error = None;
        while let Some(step) = self.completed.pop() {
            if let Err(err) = (step.rollback)().await {
                tracing::error!(step = step.label, error = %err, "rollback step failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
