//! Component C — ProgressEngine.
//!
//! Format-aware progress validation, completion detection, regression
//! analysis, and position<->percentage conversions (section 4.3).

use crate::model::BookFormat;

pub const MIN_PROGRESS: f64 = 0.0;
pub const MAX_PROGRESS: f64 = 100.0;
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 95.0;
pub const DEFAULT_ZERO_THRESHOLD: f64 = 5.0;
pub const SIGNIFICANT_CHANGE_THRESHOLD: f64 = 0.1;
pub const AUDIOBOOK_TIME_REMAINING_COMPLETION_SECONDS: f64 = 120.0;
pub const BOOK_PAGES_REMAINING_COMPLETION: u32 = 3;

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub is_finished: Option<bool>,
    pub format: Option<BookFormat>,
    pub current_time_seconds: Option<f64>,
    pub duration_seconds: Option<f64>,
}

/// Returns `None` only when the provided value is non-finite and there is
/// no way to otherwise derive a progress value.
pub fn validate(progress: Option<f64>, opts: &ValidateOptions) -> Option<f64> {
    if opts.is_finished == Some(true) {
        if let Some(p) = progress {
            if p.is_finite() {
                return Some(p.clamp(MIN_PROGRESS, MAX_PROGRESS));
            }
        }
        return Some(MAX_PROGRESS);
    }

    if opts.format == Some(BookFormat::Audiobook) {
        if let (Some(current), Some(duration)) = (opts.current_time_seconds, opts.duration_seconds)
        {
            if duration > 0.0 {
                let computed = round6((current / duration) * 100.0).clamp(MIN_PROGRESS, MAX_PROGRESS);
                if let Some(provided) = progress {
                    if provided.is_finite() && (provided - computed).abs() > 1.0 {
                        tracing::debug!(
                            provided,
                            computed,
                            "position-derived progress disagrees with provided value by >1%"
                        );
                    }
                }
                return Some(computed);
            }
        }
    }

    match progress {
        Some(p) if p.is_finite() => Some(p.clamp(MIN_PROGRESS, MAX_PROGRESS)),
        Some(p) => {
            tracing::warn!(value = p, "invalid progress input, discarding");
            None
        }
        None => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub is_finished: Option<bool>,
    pub threshold: Option<f64>,
    pub format: Option<BookFormat>,
    pub current_time_seconds: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
}

pub fn is_complete(progress: f64, opts: &CompletionOptions) -> bool {
    if opts.is_finished == Some(true) {
        return true;
    }
    if opts.is_finished == Some(false) {
        return false;
    }

    let threshold = opts.threshold.unwrap_or(DEFAULT_COMPLETION_THRESHOLD);

    match opts.format {
        Some(BookFormat::Audiobook) => {
            if let (Some(current), Some(duration)) =
                (opts.current_time_seconds, opts.duration_seconds)
            {
                if duration > 0.0 && (duration - current) <= AUDIOBOOK_TIME_REMAINING_COMPLETION_SECONDS
                {
                    return true;
                }
            }
            progress >= threshold
        }
        Some(BookFormat::Ebook) | Some(BookFormat::Physical) => {
            if let (Some(current), Some(total)) = (opts.current_page, opts.total_pages) {
                if total >= current && (total - current) <= BOOK_PAGES_REMAINING_COMPLETION {
                    return true;
                }
            }
            progress >= threshold
        }
        _ => progress >= threshold,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    Pages,
    Seconds,
}

/// pages: 1-based; seconds: 0-based.
pub fn current_position(pct: f64, total: f64, kind: PositionKind) -> f64 {
    let raw = (pct / 100.0 * total).round();
    match kind {
        PositionKind::Pages => raw.max(1.0),
        PositionKind::Seconds => raw.max(0.0),
    }
}

/// Inverse of `current_position`, chosen so pages round-trip exactly
/// ("N% -> page N" mapping).
pub fn progress_from_position(position: f64, total: f64, kind: PositionKind) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let pct = match kind {
        PositionKind::Pages => (position / total) * 100.0,
        PositionKind::Seconds => (position / total) * 100.0,
    };
    round6(pct.clamp(MIN_PROGRESS, MAX_PROGRESS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDirection {
    Increase,
    Decrease,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeResult {
    pub has_change: bool,
    pub direction: ChangeDirection,
    pub absolute_change: f64,
    pub is_regression: bool,
}

pub fn detect_change(old: f64, new: f64, threshold: f64) -> ChangeResult {
    let old_r = round6(old);
    let new_r = round6(new);
    let diff = round6(new_r - old_r);
    let absolute_change = diff.abs();
    let has_change = absolute_change >= threshold;
    let direction = if !has_change {
        ChangeDirection::None
    } else if diff > 0.0 {
        ChangeDirection::Increase
    } else {
        ChangeDirection::Decrease
    };
    ChangeResult {
        has_change,
        direction,
        absolute_change,
        is_regression: has_change && diff < 0.0,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionOptions {
    pub reread_threshold: Option<f64>,
    pub high_threshold: Option<f64>,
    pub block_threshold: Option<f64>,
    pub warn_threshold: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionAnalysis {
    pub drop: f64,
    pub should_block: bool,
    pub should_warn: bool,
    pub is_potential_reread: bool,
}

/// Missing `old` is treated as a new book: no regression, no warning.
pub fn analyze_regression(old: Option<f64>, new: f64, opts: RegressionOptions) -> RegressionAnalysis {
    let reread = opts.reread_threshold.unwrap_or(30.0);
    let high = opts.high_threshold.unwrap_or(85.0);
    let block = opts.block_threshold.unwrap_or(50.0);
    let warn = opts.warn_threshold.unwrap_or(15.0);

    let Some(old) = old else {
        return RegressionAnalysis {
            drop: 0.0,
            should_block: false,
            should_warn: false,
            is_potential_reread: false,
        };
    };

    let drop = (old - new).max(0.0);
    let should_block = drop >= block;
    let is_potential_reread = old >= high && new <= reread;
    let should_warn = !should_block && drop >= warn;

    RegressionAnalysis {
        drop,
        should_block,
        should_warn,
        is_potential_reread,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_trusts_finished_flag() {
        assert_eq!(
            validate(
                Some(42.0),
                &ValidateOptions {
                    is_finished: Some(true),
                    ..Default::default()
                }
            ),
            Some(42.0)
        );
        assert_eq!(
            validate(
                None,
                &ValidateOptions {
                    is_finished: Some(true),
                    ..Default::default()
                }
            ),
            Some(100.0)
        );
    }

    #[test]
    fn validate_computes_audiobook_position_based_progress() {
        let opts = ValidateOptions {
            is_finished: Some(false),
            format: Some(BookFormat::Audiobook),
            current_time_seconds: Some(1800.0),
            duration_seconds: Some(3600.0),
        };
        assert_eq!(validate(Some(10.0), &opts), Some(50.0));
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let opts = ValidateOptions {
            is_finished: Some(false),
            ..Default::default()
        };
        assert_eq!(validate(Some(150.0), &opts), Some(100.0));
        assert_eq!(validate(Some(-5.0), &opts), Some(0.0));
    }

    #[test]
    fn validate_rejects_non_finite() {
        let opts = ValidateOptions {
            is_finished: Some(false),
            ..Default::default()
        };
        assert_eq!(validate(Some(f64::NAN), &opts), None);
    }

    #[test]
    fn is_complete_audiobook_time_remaining_precise_check() {
        let opts = CompletionOptions {
            is_finished: Some(false),
            format: Some(BookFormat::Audiobook),
            current_time_seconds: Some(3500.0),
            duration_seconds: Some(3600.0),
            ..Default::default()
        };
        assert!(is_complete(97.0, &opts));
    }

    #[test]
    fn is_complete_ebook_pages_remaining() {
        let opts = CompletionOptions {
            is_finished: Some(false),
            format: Some(BookFormat::Ebook),
            current_page: Some(298),
            total_pages: Some(300),
            ..Default::default()
        };
        assert!(is_complete(90.0, &opts));
    }

    #[test]
    fn round_trip_pages_is_exact() {
        for pages in [1u32, 50, 300] {
            for pct in 0..=100 {
                let pos = current_position(pct as f64, pages as f64, PositionKind::Pages);
                let back = progress_from_position(pos, pages as f64, PositionKind::Pages);
                // exact idempotence within 6-decimal precision of the
                // *position* mapping, not necessarily of `pct` itself
                // (pages quantize progress).
                let pos2 = current_position(back, pages as f64, PositionKind::Pages);
                assert_eq!(pos, pos2);
            }
        }
    }

    #[test]
    fn round_trip_seconds_is_exact_within_precision() {
        let total = 3600.0;
        for pct in 0..=100 {
            let pos = current_position(pct as f64, total, PositionKind::Seconds);
            let back = progress_from_position(pos, total, PositionKind::Seconds);
            let pos2 = current_position(back, total, PositionKind::Seconds);
            assert_eq!(pos, pos2);
        }
    }

    #[test]
    fn regression_blocks_major_drop() {
        let result = analyze_regression(Some(92.0), 22.0, RegressionOptions::default());
        assert!(result.should_block);
        assert!((result.drop - 70.0).abs() < 1e-9);
    }

    #[test]
    fn regression_flags_potential_reread() {
        let result = analyze_regression(Some(90.0), 5.0, RegressionOptions::default());
        assert!(result.is_potential_reread);
        assert!(result.should_block);
    }

    #[test]
    fn regression_warns_without_blocking() {
        let result = analyze_regression(Some(50.0), 33.0, RegressionOptions::default());
        assert!(result.should_warn);
        assert!(!result.should_block);
    }

    #[test]
    fn missing_old_progress_is_not_a_regression() {
        let result = analyze_regression(None, 10.0, RegressionOptions::default());
        assert!(!result.should_block && !result.should_warn);
    }

    #[test]
    fn detect_change_rounds_away_fp_noise() {
        let result = detect_change(50.000000_1, 50.000000_2, SIGNIFICANT_CHANGE_THRESHOLD);
        assert!(!result.has_change);
    }
}
