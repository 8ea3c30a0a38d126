//! Shared data model (spec section 3). Every other module builds on these
//! types instead of passing around loose tuples or `serde_json::Value`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// A book as reported by the source library service, immutable for the
/// duration of one sync run.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceBook {
    pub id: String,
    pub title: String,
    pub author: String,
    pub narrator: Option<String>,
    pub series: Option<SeriesRef>,
    pub published_year: Option<i32>,
    pub asin: Option<String>,
    pub isbn: Option<String>,
    pub duration_seconds: Option<f64>,
    pub pages: Option<u32>,
    pub current_time_seconds: Option<f64>,
    pub progress_percentage: f64,
    pub is_finished: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_listened_at: Option<DateTime<Utc>>,
    pub format_hint: BookFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRef {
    pub name: String,
    pub sequence: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BookFormat {
    Audiobook,
    Ebook,
    Physical,
    #[default]
    Unknown,
}

impl BookFormat {
    pub fn from_hint(hint: &str) -> Self {
        match hint.to_ascii_lowercase().as_str() {
            "audiobook" | "audio" | "listened" => BookFormat::Audiobook,
            "ebook" | "digital" | "epub" | "pdf" => BookFormat::Ebook,
            "physical" | "print" | "paperback" | "hardcover" => BookFormat::Physical,
            _ => BookFormat::Unknown,
        }
    }
}

/// A tagged value identifying a book, in precedence order ASIN > ISBN >
/// title/author.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Asin(String),
    Isbn(String),
    TitleAuthor(String),
}

impl Identifier {
    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Asin(_) => IdentifierKind::Asin,
            Identifier::Isbn(_) => IdentifierKind::Isbn,
            Identifier::TitleAuthor(_) => IdentifierKind::TitleAuthor,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Identifier::Asin(v) | Identifier::Isbn(v) | Identifier::TitleAuthor(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentifierKind {
    Asin,
    Isbn,
    TitleAuthor,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Asin => "asin",
            IdentifierKind::Isbn => "isbn",
            IdentifierKind::TitleAuthor => "title_author",
        }
    }
}

/// Domain-level view of a persisted cache row (spec section 3). Distinct
/// from the sea-orm `entities::cached_mapping::Model` so the engine never
/// depends directly on the storage layer's schema types.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMapping {
    pub user_id: String,
    pub identifier_kind: IdentifierKind,
    pub identifier_value: String,
    pub title_norm: String,
    pub author_norm: String,
    pub edition_id: i64,
    pub book_id: i64,
    pub last_progress_percent: f64,
    pub last_hardcover_sync_ts: Option<DateTime<Utc>>,
    pub session_pending_progress: Option<f64>,
    pub session_last_update_ts: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A specific publication of a book in the remote catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Edition {
    pub edition_id: i64,
    pub book_id: i64,
    pub format: BookFormat,
    pub audio_seconds: Option<f64>,
    pub pages: Option<u32>,
    pub release_year: Option<i32>,
    pub reading_format: Option<String>,
    pub contributions: Vec<String>,
    /// Catalog popularity signal (e.g. users-count); used by the activity
    /// scoring band in section 4.2.
    pub activity_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Cache,
    Asin,
    Isbn,
    TitleAuthor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Confidence::High
        } else if score >= 70.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    /// Null when the match originates from a catalog search rather than
    /// the user's existing shelf.
    pub user_book_id: Option<i64>,
    pub edition: Edition,
    pub book_id: i64,
    pub match_type: MatchType,
    pub confidence: Confidence,
    pub score: f64,
    pub breakdown: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    SyncNow,
    Delay,
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressDecision {
    pub action: SyncAction,
    pub reason: String,
    pub is_completion: bool,
    pub target_percent: f64,
    pub target_position: Option<TargetPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetPosition {
    Pages(u32),
    Seconds(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Synced,
    Completed,
    AutoAdded,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub before: Option<f64>,
    pub after: f64,
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiResponseInfo {
    pub success: bool,
    pub status: Option<u16>,
    pub duration_s: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutcomeTimestamps {
    pub last_listened_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-book result emitted to the `ResultCollector` (component J).
#[derive(Debug, Clone, PartialEq)]
pub struct BookOutcome {
    pub book_ref: String,
    pub status: OutcomeStatus,
    pub progress: ProgressSnapshot,
    pub identifiers: Vec<Identifier>,
    pub hardcover_edition_id: Option<i64>,
    pub hardcover_format: Option<BookFormat>,
    pub action_text: String,
    pub api_response: Option<ApiResponseInfo>,
    pub reason: Option<String>,
    pub errors: Vec<String>,
    pub timing_ms: u64,
    pub timestamps: OutcomeTimestamps,
}

impl BookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Error)
    }
}
