//! Component J — ResultCollector.
//!
//! Thread-safe, append-only accumulator of per-book outcomes for one
//! reconciliation run, plus the summary counters the final report and
//! failed-sync dump are built from.

use std::sync::Mutex;

use crate::model::{BookOutcome, OutcomeStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub synced: usize,
    pub completed: usize,
    pub auto_added: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Default)]
pub struct ResultCollector {
    outcomes: Mutex<Vec<BookOutcome>>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: BookOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }

    pub fn summary(&self) -> Summary {
        let outcomes = self.outcomes.lock().unwrap();
        let mut summary = Summary {
            total: outcomes.len(),
            ..Summary::default()
        };
        for outcome in outcomes.iter() {
            match outcome.status {
                OutcomeStatus::Synced => summary.synced += 1,
                OutcomeStatus::Completed => summary.completed += 1,
                OutcomeStatus::AutoAdded => summary.auto_added += 1,
                OutcomeStatus::Skipped => summary.skipped += 1,
                OutcomeStatus::Error => summary.errors += 1,
            }
        }
        summary
    }

    pub fn failures(&self) -> Vec<BookOutcome> {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.is_failure())
            .cloned()
            .collect()
    }

    pub fn into_outcomes(self) -> Vec<BookOutcome> {
        self.outcomes.into_inner().unwrap()
    }

    pub fn outcomes(&self) -> Vec<BookOutcome> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiResponseInfo, OutcomeTimestamps, ProgressSnapshot};

    fn outcome(status: OutcomeStatus) -> BookOutcome {
        BookOutcome {
            book_ref: "book-1".into(),
            status,
            progress: ProgressSnapshot {
                before: Some(10.0),
                after: 20.0,
                changed: true,
            },
            identifiers: vec![],
            hardcover_edition_id: None,
            hardcover_format: None,
            action_text: "synced".into(),
            api_response: Some(ApiResponseInfo::default()),
            reason: None,
            errors: vec![],
            timing_ms: 5,
            timestamps: OutcomeTimestamps::default(),
        }
    }

    #[test]
    fn summary_counts_by_status() {
        let collector = ResultCollector::new();
        collector.record(outcome(OutcomeStatus::Synced));
        collector.record(outcome(OutcomeStatus::Error));
        collector.record(outcome(OutcomeStatus::Skipped));
        let summary = collector.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.synced, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn failures_returns_only_error_outcomes() {
        let collector = ResultCollector::new();
        collector.record(outcome(OutcomeStatus::Synced));
        collector.record(outcome(OutcomeStatus::Error));
        assert_eq!(collector.failures().len(), 1);
    }
}
