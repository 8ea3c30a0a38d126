//! End-to-end scenarios for the Reconciler pipeline (section 4.8),
//! exercising the seed cases from section 8 against the real
//! `Reconciler` wired to an in-memory cache and hand-written fakes for
//! the source library and remote book-tracking services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set};

use entities::cached_mapping;
use shelfbridge::cache::{BookCache, SeaOrmBookCache};
use shelfbridge::concurrency::{RateLimiter, RetryManager};
use shelfbridge::model::{ApiResponseInfo, BookFormat, Edition, Identifier, OutcomeStatus, SourceBook};
use shelfbridge::reconciler::{Reconciler, ReconcilerConfig};
use shelfbridge::remote_client::{RemoteBookService, UserBook};
use shelfbridge::session::SessionConfig;
use shelfbridge::source_client::{LibraryStats, SourceLibraryClient};
use tokio_util::sync::CancellationToken;

struct FakeSource {
    books: Mutex<Vec<SourceBook>>,
}

impl FakeSource {
    fn new(books: Vec<SourceBook>) -> Self {
        Self {
            books: Mutex::new(books),
        }
    }

    fn set_books(&self, books: Vec<SourceBook>) {
        *self.books.lock().unwrap() = books;
    }
}

#[async_trait]
impl SourceLibraryClient for FakeSource {
    async fn get_user_library_books(&self, _user: &str) -> anyhow::Result<Vec<SourceBook>> {
        Ok(self.books.lock().unwrap().clone())
    }

    async fn get_library_stats(&self, _user: &str) -> anyhow::Result<LibraryStats> {
        Ok(LibraryStats::default())
    }

    async fn test_connection(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
struct FakeRemote {
    asin_editions: Mutex<HashMap<String, Vec<Edition>>>,
    isbn_editions: Mutex<HashMap<String, Vec<Edition>>>,
    title_author_editions: Mutex<Vec<Edition>>,
    existing_user_books: Mutex<HashMap<i64, UserBook>>,
    next_user_book_id: AtomicI64,
    pub update_progress_calls: AtomicUsize,
    pub mark_complete_calls: AtomicUsize,
    pub add_book_calls: AtomicUsize,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            next_user_book_id: AtomicI64::new(1000),
            ..Default::default()
        }
    }

    fn with_asin(self, asin: &str, editions: Vec<Edition>) -> Self {
        self.asin_editions.lock().unwrap().insert(asin.to_string(), editions);
        self
    }

    fn with_isbn(self, isbn: &str, editions: Vec<Edition>) -> Self {
        self.isbn_editions.lock().unwrap().insert(isbn.to_string(), editions);
        self
    }

    fn with_title_author(self, editions: Vec<Edition>) -> Self {
        *self.title_author_editions.lock().unwrap() = editions;
        self
    }

    fn with_existing_user_book(self, book_id: i64, user_book: UserBook) -> Self {
        self.existing_user_books.lock().unwrap().insert(book_id, user_book);
        self
    }
}

#[async_trait]
impl RemoteBookService for FakeRemote {
    async fn search_editions_by_asin(&self, asin: &str) -> anyhow::Result<Vec<Edition>> {
        Ok(self.asin_editions.lock().unwrap().get(asin).cloned().unwrap_or_default())
    }

    async fn search_editions_by_isbn(&self, isbn: &str) -> anyhow::Result<Vec<Edition>> {
        Ok(self.isbn_editions.lock().unwrap().get(isbn).cloned().unwrap_or_default())
    }

    async fn search_by_title_author(&self, _title: &str, _author: &str, _limit: u32) -> anyhow::Result<Vec<Edition>> {
        Ok(self.title_author_editions.lock().unwrap().clone())
    }

    async fn get_user_book(&self, book_id: i64) -> anyhow::Result<Option<UserBook>> {
        Ok(self.existing_user_books.lock().unwrap().get(&book_id).cloned())
    }

    async fn update_progress(
        &self,
        _user_book_id: i64,
        _edition_id: i64,
        _progress_percent: f64,
        _position_seconds: Option<f64>,
        _position_pages: Option<u32>,
    ) -> anyhow::Result<ApiResponseInfo> {
        self.update_progress_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ApiResponseInfo {
            success: true,
            status: Some(200),
            duration_s: 0.01,
        })
    }

    async fn mark_complete(
        &self,
        _user_book_id: i64,
        _edition_id: i64,
        _completed_at: chrono::DateTime<Utc>,
    ) -> anyhow::Result<ApiResponseInfo> {
        self.mark_complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ApiResponseInfo {
            success: true,
            status: Some(200),
            duration_s: 0.01,
        })
    }

    async fn add_book_to_library(
        &self,
        _book_id: i64,
        _edition_id: i64,
        _initial_progress: f64,
    ) -> anyhow::Result<(i64, ApiResponseInfo)> {
        self.add_book_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_user_book_id.fetch_add(1, Ordering::SeqCst);
        Ok((
            id,
            ApiResponseInfo {
                success: true,
                status: Some(200),
                duration_s: 0.01,
            },
        ))
    }

    async fn test_connection(&self) -> anyhow::Result<bool> {
        Ok(true)
    }
}

fn book() -> SourceBook {
    SourceBook {
        id: "item-1".into(),
        title: "The Laws of the Skies".into(),
        author: "Gregoire Courtois".into(),
        narrator: None,
        series: None,
        published_year: Some(2023),
        asin: None,
        isbn: None,
        duration_seconds: None,
        pages: None,
        current_time_seconds: None,
        progress_percentage: 0.0,
        is_finished: false,
        started_at: None,
        last_listened_at: None,
        format_hint: BookFormat::Ebook,
    }
}

fn strong_edition(book_id: i64) -> Edition {
    Edition {
        edition_id: book_id,
        book_id,
        format: BookFormat::Audiobook,
        audio_seconds: Some(18000.0),
        pages: None,
        release_year: Some(2023),
        reading_format: Some("audiobook".into()),
        contributions: Vec::new(),
        activity_count: Some(1200),
    }
}

fn weak_edition(book_id: i64) -> Edition {
    Edition {
        edition_id: book_id,
        book_id,
        format: BookFormat::Physical,
        audio_seconds: None,
        pages: Some(200),
        release_year: Some(1950),
        reading_format: Some("physical".into()),
        contributions: Vec::new(),
        activity_count: Some(10),
    }
}

async fn in_memory_db() -> Arc<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    Arc::new(db)
}

fn harness(
    db: Arc<DatabaseConnection>,
    source: Arc<FakeSource>,
    remote: Arc<FakeRemote>,
    session: SessionConfig,
) -> Arc<Reconciler> {
    let cache = Arc::new(SeaOrmBookCache::new(db));
    let config = ReconcilerConfig {
        worker_concurrency: 2,
        abs_rate_limit_per_minute: 6000,
        hardcover_rate_limit_per_minute: 6000,
        auto_add_books: false,
        session,
    };
    Arc::new(Reconciler::new(
        source,
        remote,
        cache,
        Arc::new(RateLimiter::new()),
        Arc::new(RetryManager::new(Default::default())),
        config,
        CancellationToken::new(),
    ))
}

// S1: progress unchanged from what's already cached is skipped without
// touching the remote service at all.
#[tokio::test]
async fn early_skip_on_unchanged_progress() {
    let db = in_memory_db().await;
    let cache = SeaOrmBookCache::new(db.clone());

    let mut b = book();
    b.asin = Some("B01ABCDEFG".into());
    b.progress_percentage = 55.0;

    let identifier = Identifier::Asin("B01ABCDEFG".into());
    let title_norm = shelfbridge::identifiers::normalize_title(&b.title);
    cache
        .store_mapping("alice", &identifier, &title_norm, "gregoire courtois", 7, 7)
        .await
        .unwrap();
    cache
        .record_sync("alice", &identifier, &title_norm, 55.0, Utc::now())
        .await
        .unwrap();

    let source = Arc::new(FakeSource::new(vec![b]));
    let remote = Arc::new(FakeRemote::new());
    let reconciler = harness(db, source, remote.clone(), SessionConfig::default());

    let collector = reconciler.run_for_user("alice").await.unwrap();
    let outcomes = collector.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Skipped);
    assert_eq!(outcomes[0].reason.as_deref(), Some("Progress unchanged (optimized early check)"));

    assert_eq!(remote.update_progress_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.mark_complete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.add_book_calls.load(Ordering::SeqCst), 0);
}

// S2: a book identified only by ISBN, never seen before, is matched and
// added to the remote library in a single mutation.
#[tokio::test]
async fn new_isbn_book_is_matched_and_added() {
    let db = in_memory_db().await;

    let mut b = book();
    b.isbn = Some("978-1-23456-789-0".into());
    b.progress_percentage = 42.0;

    let source = Arc::new(FakeSource::new(vec![b]));
    let remote = Arc::new(FakeRemote::new().with_isbn("9781234567890", vec![strong_edition(55)]));
    let reconciler = harness(db.clone(), source, remote.clone(), SessionConfig::default());

    let collector = reconciler.run_for_user("alice").await.unwrap();
    let outcomes = collector.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Synced);
    assert_eq!(outcomes[0].hardcover_edition_id, Some(55));
    assert!(matches!(outcomes[0].identifiers[0], Identifier::Isbn(_)));

    // A never-before-seen book is both added to the remote library and
    // given its initial progress in the same sync pass.
    assert_eq!(remote.add_book_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.update_progress_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.mark_complete_calls.load(Ordering::SeqCst), 0);

    let rows = cached_mapping::Entity::find()
        .filter(cached_mapping::Column::UserId.eq("alice"))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].identifier_kind, cached_mapping::IdentifierKind::Isbn);
    assert_eq!(rows[0].last_progress_percent, 42.0);
}

// S3: no identifiers at all; the engine falls back to title/author
// scoring and picks the stronger of two candidates.
#[tokio::test]
async fn title_author_match_picks_the_stronger_candidate() {
    let db = in_memory_db().await;

    let b = book(); // no asin/isbn
    let source = Arc::new(FakeSource::new(vec![b.clone()]));
    let remote = Arc::new(FakeRemote::new().with_title_author(vec![weak_edition(1), strong_edition(2)]));
    let reconciler = harness(db.clone(), source, remote.clone(), SessionConfig::default());

    let collector = reconciler.run_for_user("alice").await.unwrap();
    let outcomes = collector.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_ne!(outcomes[0].status, OutcomeStatus::Error);
    assert_eq!(outcomes[0].hardcover_edition_id, Some(2));

    let expected_key = shelfbridge::identifiers::title_author_key(&b.title, &b.author);
    match &outcomes[0].identifiers[0] {
        Identifier::TitleAuthor(value) => assert_eq!(value, &expected_key),
        other => panic!("expected title/author identifier, got {other:?}"),
    }
}

// S4: a large backward jump from a previously synced high-water mark is
// blocked rather than written through.
#[tokio::test]
async fn large_regression_is_blocked() {
    let db = in_memory_db().await;
    let cache = SeaOrmBookCache::new(db.clone());

    let mut b = book();
    b.asin = Some("B01ABCDEFG".into());
    b.progress_percentage = 22.0;

    let identifier = Identifier::Asin("B01ABCDEFG".into());
    let title_norm = shelfbridge::identifiers::normalize_title(&b.title);
    cache
        .store_mapping("alice", &identifier, &title_norm, "gregoire courtois", 7, 7)
        .await
        .unwrap();
    cache
        .record_sync("alice", &identifier, &title_norm, 92.0, Utc::now())
        .await
        .unwrap();

    let source = Arc::new(FakeSource::new(vec![b]));
    let remote = Arc::new(FakeRemote::new());
    let reconciler = harness(db, source, remote.clone(), SessionConfig::default());

    let collector = reconciler.run_for_user("alice").await.unwrap();
    let outcomes = collector.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Error);
    assert_eq!(outcomes[0].reason.as_deref(), Some("Major regression blocked, 70.0% drop"));

    assert_eq!(remote.update_progress_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.mark_complete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.add_book_calls.load(Ordering::SeqCst), 0);
}

// S5: a small in-session update (neither a milestone crossing nor a
// >=5% jump) is delayed, then flushed with a real remote mutation once
// the session has been idle past its timeout on a later run.
#[tokio::test]
async fn delayed_update_flushes_after_session_expiry() {
    let db = in_memory_db().await;
    let cache = SeaOrmBookCache::new(db.clone());

    let mut b = book();
    b.isbn = Some("978-1-23456-789-0".into());
    b.progress_percentage = 22.0; // +2 over the cached baseline below

    // A prior sync already mapped this book to an existing remote
    // user_book at 20%, so the upcoming update is a small in-session
    // nudge, not a first-ever sync.
    let identifier = Identifier::Isbn("9781234567890".into());
    let title_norm = shelfbridge::identifiers::normalize_title(&b.title);
    cache
        .store_mapping("alice", &identifier, &title_norm, "gregoire courtois", 9, 9)
        .await
        .unwrap();
    cache
        .record_sync("alice", &identifier, &title_norm, 20.0, Utc::now())
        .await
        .unwrap();

    let source = Arc::new(FakeSource::new(vec![b]));
    let remote = Arc::new(
        FakeRemote::new()
            .with_isbn(
                "9781234567890",
                vec![strong_edition(9)],
            )
            .with_existing_user_book(
                9,
                UserBook {
                    user_book_id: 500,
                    book_id: 9,
                    edition_id: 9,
                    progress_percent: 20.0,
                },
            ),
    );
    let session = SessionConfig {
        enabled: true,
        session_timeout_s: 60,
        max_delay_s: 300,
        immediate_completion: true,
    };
    let reconciler = harness(db.clone(), source.clone(), remote.clone(), session);

    let collector = reconciler.run_for_user("alice").await.unwrap();
    let outcomes = collector.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Skipped);
    assert_eq!(outcomes[0].reason.as_deref(), Some("delayed_until_session_expiry"));
    assert_eq!(remote.update_progress_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.add_book_calls.load(Ordering::SeqCst), 0);

    // Backdate the pending session so the next pass sees it as expired,
    // the way a real idle gap between runs would.
    let row = cached_mapping::Entity::find()
        .filter(cached_mapping::Column::UserId.eq("alice"))
        .one(db.as_ref())
        .await
        .unwrap()
        .expect("session row was stored");
    let mut am: cached_mapping::ActiveModel = row.into();
    am.session_last_update_ts = Set(Some((Utc::now() - Duration::seconds(61)).into()));
    am.update(db.as_ref()).await.unwrap();

    // The source no longer reports the book this pass (e.g. playback
    // stopped); only the expired-session flush should act on it.
    source.set_books(vec![]);
    let second_pass = reconciler.run_for_user("alice").await.unwrap();
    let flushed = second_pass.outcomes();
    assert_eq!(flushed.len(), 1);
    assert_eq!(flushed[0].status, OutcomeStatus::Synced);
    assert_eq!(flushed[0].reason.as_deref(), Some("session expired, pending progress flushed"));

    // The flush must be a real remote mutation against the existing
    // user_book (I2), not a disguised cache-only write.
    assert_eq!(remote.update_progress_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.add_book_calls.load(Ordering::SeqCst), 0);

    let rows = cached_mapping::Entity::find()
        .filter(cached_mapping::Column::UserId.eq("alice"))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(rows[0].last_progress_percent, 22.0);
    assert!(rows[0].session_pending_progress.is_none());
}

// S6: an audiobook within the time-remaining completion window is
// synced as a completion against an already-existing remote user book.
#[tokio::test]
async fn audiobook_completes_by_time_remaining() {
    let db = in_memory_db().await;

    let mut b = book();
    b.asin = Some("B01ABCDEFG".into());
    b.format_hint = BookFormat::Audiobook;
    b.current_time_seconds = Some(3500.0);
    b.progress_percentage = 97.0;

    let edition = Edition {
        audio_seconds: Some(3600.0),
        ..strong_edition(77)
    };
    let source = Arc::new(FakeSource::new(vec![b]));
    let remote = Arc::new(
        FakeRemote::new()
            .with_asin("B01ABCDEFG", vec![edition])
            .with_existing_user_book(
                77,
                UserBook {
                    user_book_id: 501,
                    book_id: 77,
                    edition_id: 77,
                    progress_percent: 10.0,
                },
            ),
    );
    let reconciler = harness(db, source, remote.clone(), SessionConfig::default());

    let collector = reconciler.run_for_user("alice").await.unwrap();
    let outcomes = collector.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, OutcomeStatus::Completed);

    assert_eq!(remote.mark_complete_calls.load(Ordering::SeqCst), 1);
    assert_eq!(remote.update_progress_calls.load(Ordering::SeqCst), 0);
    assert_eq!(remote.add_book_calls.load(Ordering::SeqCst), 0);
}
