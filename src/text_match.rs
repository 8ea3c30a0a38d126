//! Component B — TextMatcher.
//!
//! Levenshtein + token-set (Jaccard) similarity and the composite
//! `match_score` used by the title/author resolver tier (section 4.2).

use crate::model::{BookFormat, Confidence, Edition};
use std::collections::{HashMap, HashSet};

/// Standard edit-distance, normalized by the longer string's length.
pub fn levenshtein_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(&a_chars, &b_chars);
    1.0 - (distance as f64 / max_len as f64)
}

fn levenshtein_distance(a: &[char], b: &[char]) -> usize {
    let (n, m) = (a.len(), b.len());
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut curr = vec![0usize; m + 1];
    for i in 1..=n {
        curr[0] = i;
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[m]
}

/// Jaccard similarity over whitespace-tokenized sets, with empty-string
/// guards.
pub fn jaccard_tokens(a: &str, b: &str) -> f64 {
    let a_tokens: HashSet<&str> = a.split_whitespace().collect();
    let b_tokens: HashSet<&str> = b.split_whitespace().collect();
    if a_tokens.is_empty() && b_tokens.is_empty() {
        return 1.0;
    }
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// `0.4 * lev_sim + 0.6 * jaccard_tokens`; exact-equal short-circuits to 1.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    0.4 * levenshtein_similarity(a, b) + 0.6 * jaccard_tokens(a, b)
}

/// Everything the composite scorer needs to know about the book the user
/// is trying to match, independent of `SourceBook` so unit tests can
/// construct it directly.
#[derive(Debug, Clone, Default)]
pub struct MatchTarget {
    pub title_norm: String,
    pub author_norm: String,
    pub series_name_norm: Option<String>,
    pub series_sequence: Option<f64>,
    pub format: BookFormat,
    pub year: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub narrator_norm: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchCandidate {
    pub title_norm: String,
    pub author_norms: Vec<String>,
    pub series_name_norm: Option<String>,
    pub series_sequence: Option<f64>,
    pub format: BookFormat,
    pub year: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub narrator_norm: Option<String>,
    pub activity_count: Option<u64>,
}

impl MatchCandidate {
    pub fn from_edition(edition: &Edition, title_norm: String, author_norms: Vec<String>) -> Self {
        MatchCandidate {
            title_norm,
            author_norms,
            series_name_norm: None,
            series_sequence: None,
            format: edition.format,
            year: edition.release_year,
            duration_seconds: edition.audio_seconds,
            narrator_norm: None,
            activity_count: edition.activity_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub total: f64,
    pub confidence: Confidence,
    pub breakdown: HashMap<String, f64>,
}

fn series_score(candidate: &MatchCandidate, target: &MatchTarget) -> f64 {
    match (&candidate.series_name_norm, &target.series_name_norm) {
        (Some(cand_name), Some(target_name)) => {
            if similarity(cand_name, target_name) < 0.8 {
                return 30.0;
            }
            match (candidate.series_sequence, target.series_sequence) {
                (Some(c), Some(t)) if (c - t).abs() < f64::EPSILON => 100.0,
                (Some(_), Some(_)) => 30.0,
                _ => 85.0,
            }
        }
        _ => 65.0,
    }
}

fn format_score(format: BookFormat) -> f64 {
    match format {
        BookFormat::Audiobook => 100.0,
        BookFormat::Ebook => 75.0,
        BookFormat::Physical => 50.0,
        BookFormat::Unknown => 25.0,
    }
}

fn activity_score(count: Option<u64>) -> f64 {
    match count {
        None => 50.0,
        Some(c) if c >= 1000 => 100.0,
        Some(c) if c >= 100 => 75.0,
        Some(c) if c < 50 => 25.0,
        Some(_) => 50.0,
    }
}

fn year_score(candidate_year: Option<i32>, target_year: Option<i32>) -> f64 {
    match (candidate_year, target_year) {
        (Some(c), Some(t)) => {
            let diff = (c - t).abs();
            match diff {
                0 => 100.0,
                1 => 90.0,
                2..=5 => 75.0,
                6..=10 => 50.0,
                _ => 20.0,
            }
        }
        _ => 70.0,
    }
}

fn duration_score(candidate: Option<f64>, target: Option<f64>) -> Option<f64> {
    let (c, t) = (candidate?, target?);
    if t <= 0.0 {
        return None;
    }
    let pct_diff = ((c - t).abs() / t) * 100.0;
    Some(if pct_diff <= 1.0 {
        100.0
    } else if pct_diff <= 3.0 {
        95.0
    } else if pct_diff <= 5.0 {
        85.0
    } else if pct_diff <= 10.0 {
        70.0
    } else if pct_diff <= 15.0 {
        50.0
    } else if pct_diff <= 20.0 {
        25.0
    } else {
        0.0
    })
}

fn narrator_score(candidate: Option<&str>, target: Option<&str>) -> f64 {
    match (candidate, target) {
        (Some(c), Some(t)) => similarity(c, t) * 100.0,
        _ => 60.0,
    }
}

/// Composite weighted match score (section 4.2). Returns total in
/// [0,100], a confidence band, and the per-signal breakdown for
/// diagnostics.
pub fn match_score(candidate: &MatchCandidate, target: &MatchTarget) -> ScoreResult {
    let title_sim = similarity(&candidate.title_norm, &target.title_norm);
    let title = title_sim * 100.0;

    let author = candidate
        .author_norms
        .iter()
        .map(|a| similarity(a, &target.author_norm) * 100.0)
        .fold(0.0_f64, f64::max);

    let series = series_score(candidate, target);
    let format = format_score(candidate.format);
    let activity = activity_score(candidate.activity_count);
    let year = year_score(candidate.year, target.year);

    let mut breakdown = HashMap::new();
    breakdown.insert("title".to_string(), title);
    breakdown.insert("author".to_string(), author);
    breakdown.insert("series".to_string(), series);
    breakdown.insert("format".to_string(), format);
    breakdown.insert("activity".to_string(), activity);
    breakdown.insert("year".to_string(), year);

    let mut weighted = title * 0.25 + author * 0.18 + series * 0.12 + format * 0.10
        + activity * 0.18
        + year * 0.07;

    if candidate.format == BookFormat::Audiobook || target.duration_seconds.is_some() {
        if let Some(duration) = duration_score(candidate.duration_seconds, target.duration_seconds)
        {
            breakdown.insert("duration".to_string(), duration);
            weighted += duration * 0.05;
        }
    }

    let narrator = narrator_score(
        candidate.narrator_norm.as_deref(),
        target.narrator_norm.as_deref(),
    );
    breakdown.insert("narrator".to_string(), narrator);
    weighted += narrator * 0.03;

    // Short-title penalty: up to -20 when normalized title <= 10 chars.
    if target.title_norm.len() <= 10 {
        let penalty = 20.0 * (1.0 - (target.title_norm.len() as f64 / 10.0));
        weighted -= penalty.min(20.0);
    }

    // Author-mismatch penalty when title is strong but author is weak.
    if title >= 80.0 && author < 30.0 {
        weighted -= 15.0;
    }

    // Format-preference bonus when the user's own format matches the
    // candidate's format.
    if candidate.format == target.format {
        weighted += match candidate.format {
            BookFormat::Audiobook => 10.0,
            BookFormat::Ebook => 8.0,
            _ => 5.0,
        };
    }

    // Perfect-match bonus when both title and author are very strong.
    if title >= 90.0 && author >= 90.0 {
        weighted += 8.0;
    }

    // High-confidence bonus when both are comfortably strong.
    if title >= 80.0 && author >= 80.0 {
        weighted += 4.0;
    }

    let total = weighted.clamp(0.0, 100.0);
    ScoreResult {
        total,
        confidence: Confidence::from_score(total),
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_strings_are_perfectly_similar() {
        assert_eq!(similarity("same", "same"), 1.0);
    }

    #[test]
    fn levenshtein_similarity_penalizes_edits() {
        let sim = levenshtein_similarity("kitten", "sitting");
        assert!(sim > 0.4 && sim < 0.7, "got {sim}");
    }

    #[test]
    fn jaccard_guards_against_empty_strings() {
        assert_eq!(jaccard_tokens("", ""), 1.0);
        assert_eq!(jaccard_tokens("a b", ""), 0.0);
    }

    #[test]
    fn strong_match_scores_high_confidence() {
        let candidate = MatchCandidate {
            title_norm: "laws of the skies".into(),
            author_norms: vec!["gregoire courtois".into()],
            format: BookFormat::Audiobook,
            year: Some(2023),
            duration_seconds: Some(18000.0),
            narrator_norm: Some("narrator x".into()),
            activity_count: Some(1200),
            ..Default::default()
        };
        let target = MatchTarget {
            title_norm: "laws of the skies".into(),
            author_norm: "gregoire courtois".into(),
            format: BookFormat::Audiobook,
            year: Some(2023),
            duration_seconds: Some(18000.0),
            narrator_norm: Some("narrator x".into()),
            ..Default::default()
        };
        let result = match_score(&candidate, &target);
        assert!(result.total >= 85.0, "got {}", result.total);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn weak_match_scores_low_confidence() {
        let candidate = MatchCandidate {
            title_norm: "completely different book".into(),
            author_norms: vec!["someone else".into()],
            format: BookFormat::Physical,
            ..Default::default()
        };
        let target = MatchTarget {
            title_norm: "laws of the skies".into(),
            author_norm: "gregoire courtois".into(),
            format: BookFormat::Audiobook,
            ..Default::default()
        };
        let result = match_score(&candidate, &target);
        assert!(result.total < 70.0, "got {}", result.total);
    }
}
