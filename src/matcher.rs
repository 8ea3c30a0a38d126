//! Component F — BookMatcher.
//!
//! Tiered resolution: cache hit first, then ASIN, then ISBN, then
//! title/author scoring (section 4.2/4.4). Each tier is tried in order
//! and the first one that produces an acceptable match wins; later tiers
//! never override an earlier one even if they'd score higher, since a
//! cache hit or an identifier match is definitionally more trustworthy
//! than a fuzzy title/author guess.

use std::collections::HashMap;

use crate::identifiers;
use crate::model::{BookFormat, CachedMapping, Confidence, Edition, Match, MatchType, SourceBook};
use crate::text_match::{match_score, MatchCandidate, MatchTarget};

/// Minimum composite score accepted from the title/author tier, on top
/// of the confidence-band gate.
pub const MIN_TITLE_AUTHOR_SCORE: f64 = 70.0;

#[async_trait::async_trait]
pub trait EditionCatalog: Send + Sync {
    async fn find_by_asin(&self, asin: &str) -> anyhow::Result<Vec<Edition>>;
    async fn find_by_isbn(&self, isbn: &str) -> anyhow::Result<Vec<Edition>>;
    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> anyhow::Result<Vec<Edition>>;
}

pub struct BookMatcher<'a> {
    catalog: &'a dyn EditionCatalog,
}

impl<'a> BookMatcher<'a> {
    pub fn new(catalog: &'a dyn EditionCatalog) -> Self {
        Self { catalog }
    }

    pub async fn resolve(
        &self,
        book: &SourceBook,
        cached: Option<&CachedMapping>,
    ) -> anyhow::Result<Option<Match>> {
        if let Some(cached) = cached {
            return Ok(Some(self.from_cache(cached)));
        }

        if let Some(asin) = book.asin.as_deref().and_then(identifiers::normalize_asin) {
            let editions = self.catalog.find_by_asin(&asin).await?;
            if let Some(edition) = pick_best_edition(&editions, book) {
                return Ok(Some(build_match(edition, MatchType::Asin, 100.0, HashMap::new())));
            }
        }

        if let Some(isbn) = book.isbn.as_deref().and_then(identifiers::normalize_isbn) {
            let editions = self.catalog.find_by_isbn(&isbn).await?;
            if let Some(edition) = pick_best_edition(&editions, book) {
                return Ok(Some(build_match(edition, MatchType::Isbn, 100.0, HashMap::new())));
            }
        }

        let title_norm = identifiers::normalize_title(&book.title);
        let author_norm = identifiers::normalize_author(&book.author);
        let candidates = self
            .catalog
            .search_by_title_author(&book.title, &book.author)
            .await?;
        if candidates.is_empty() {
            return Ok(None);
        }

        let target = MatchTarget {
            title_norm,
            author_norm: author_norm.clone(),
            series_name_norm: book.series.as_ref().map(|s| identifiers::normalize_title(&s.name)),
            series_sequence: book.series.as_ref().and_then(|s| s.sequence),
            format: book.format_hint,
            year: book.published_year,
            duration_seconds: book.duration_seconds,
            narrator_norm: book.narrator.as_deref().map(identifiers::normalize_narrator),
        };

        let mut best: Option<(Edition, f64, HashMap<String, f64>)> = None;
        for edition in candidates {
            let candidate = MatchCandidate::from_edition(
                &edition,
                identifiers::normalize_title(&book.title),
                vec![author_norm.clone()],
            );
            let result = match_score(&candidate, &target);
            let better = match &best {
                None => true,
                Some((_, best_score, _)) => is_better(result.total, &edition, *best_score),
            };
            if better {
                best = Some((edition, result.total, result.breakdown));
            }
        }

        match best {
            Some((edition, score, breakdown))
                if score >= MIN_TITLE_AUTHOR_SCORE && Confidence::from_score(score) >= Confidence::Medium =>
            {
                Ok(Some(build_match(edition, MatchType::TitleAuthor, score, breakdown)))
            }
            _ => Ok(None),
        }
    }

    fn from_cache(&self, cached: &CachedMapping) -> Match {
        Match {
            user_book_id: None,
            edition: Edition {
                edition_id: cached.edition_id,
                book_id: cached.book_id,
                format: BookFormat::Unknown,
                audio_seconds: None,
                pages: None,
                release_year: None,
                reading_format: None,
                contributions: Vec::new(),
                activity_count: None,
            },
            book_id: cached.book_id,
            match_type: MatchType::Cache,
            confidence: Confidence::High,
            score: 100.0,
            breakdown: HashMap::new(),
        }
    }
}

/// Among multiple editions sharing one identifier, prefer the one whose
/// format matches the source book's, tie-broken by higher activity then
/// a closer publication year.
fn pick_best_edition<'a>(editions: &'a [Edition], book: &SourceBook) -> Option<&'a Edition> {
    editions.iter().max_by(|a, b| {
        edition_preference_key(a, book)
            .partial_cmp(&edition_preference_key(b, book))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

fn edition_preference_key(edition: &Edition, book: &SourceBook) -> f64 {
    let format_bonus = if edition.format == book.format_hint { 1000.0 } else { 0.0 };
    let activity = edition.activity_count.unwrap_or(0) as f64;
    let year_closeness = match (edition.release_year, book.published_year) {
        (Some(e), Some(b)) => -((e - b).abs() as f64),
        _ => 0.0,
    };
    format_bonus + activity + year_closeness
}

fn is_better(new_score: f64, new_edition: &Edition, best_score: f64) -> bool {
    if (new_score - best_score).abs() > f64::EPSILON {
        return new_score > best_score;
    }
    new_edition.activity_count.unwrap_or(0) > 0
}

fn build_match(
    edition: Edition,
    match_type: MatchType,
    score: f64,
    breakdown: HashMap<String, f64>,
) -> Match {
    let book_id = edition.book_id;
    Match {
        user_book_id: None,
        confidence: Confidence::from_score(score),
        match_type,
        score,
        breakdown,
        book_id,
        edition,
    }
}
