//! Component H — Reconciler / SyncEngine.
//!
//! Orchestrates the per-book pipeline described in section 4.8: early
//! skip, match, progress/completion decision, regression gate, session
//! gate, remote mutation under rate-limit/retry/rollback discipline,
//! cache commit, outcome recording. `run_for_user` drives one full pass
//! over a user's library with bounded concurrency (component E) and
//! finishes by flushing expired sessions (component G).

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::cache::BookCache;
use crate::concurrency::{RateLimiter, RateLimiterConfig, RetryManager, TaskQueue};
use crate::error::SyncError;
use crate::identifiers;
use crate::matcher::{BookMatcher, EditionCatalog};
use crate::model::{
    ApiResponseInfo, BookOutcome, Identifier, Match, OutcomeStatus, OutcomeTimestamps, ProgressSnapshot,
    SourceBook, TargetPosition,
};
use crate::progress::{self, CompletionOptions, PositionKind, RegressionOptions, ValidateOptions};
use crate::remote_client::RemoteBookService;
use crate::result_collector::ResultCollector;
use crate::session::{SessionConfig, SessionDecision, SessionManager};
use crate::source_client::SourceLibraryClient;
use crate::transaction::Transaction;

pub const ABS_SERVICE: &str = "audiobookshelf";
pub const HARDCOVER_SERVICE: &str = "hardcover";

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub worker_concurrency: usize,
    pub abs_rate_limit_per_minute: u32,
    pub hardcover_rate_limit_per_minute: u32,
    pub auto_add_books: bool,
    pub session: SessionConfig,
}

/// Adapts a `RemoteBookService` (the full mutation API) into the
/// narrower `EditionCatalog` read surface the matcher needs, so the
/// matcher stays decoupled from mutation concerns.
struct RemoteCatalog<'a> {
    remote: &'a dyn RemoteBookService,
}

#[async_trait::async_trait]
impl<'a> EditionCatalog for RemoteCatalog<'a> {
    async fn find_by_asin(&self, asin: &str) -> anyhow::Result<Vec<crate::model::Edition>> {
        self.remote.search_editions_by_asin(asin).await
    }
    async fn find_by_isbn(&self, isbn: &str) -> anyhow::Result<Vec<crate::model::Edition>> {
        self.remote.search_editions_by_isbn(isbn).await
    }
    async fn search_by_title_author(
        &self,
        title: &str,
        author: &str,
    ) -> anyhow::Result<Vec<crate::model::Edition>> {
        self.remote.search_by_title_author(title, author, 10).await
    }
}

pub struct Reconciler {
    source: Arc<dyn SourceLibraryClient>,
    remote: Arc<dyn RemoteBookService>,
    cache: Arc<dyn BookCache>,
    rate_limiter: Arc<RateLimiter>,
    retry: Arc<RetryManager>,
    config: ReconcilerConfig,
    cancel: CancellationToken,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn SourceLibraryClient>,
        remote: Arc<dyn RemoteBookService>,
        cache: Arc<dyn BookCache>,
        rate_limiter: Arc<RateLimiter>,
        retry: Arc<RetryManager>,
        config: ReconcilerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            remote,
            cache,
            rate_limiter,
            retry,
            config,
            cancel,
        }
    }

    #[tracing::instrument(skip(self), fields(user_id = %user))]
    pub async fn run_for_user(self: &Arc<Self>, user: &str) -> anyhow::Result<ResultCollector> {
        let books = self.source.get_user_library_books(user).await?;
        let collector = Arc::new(ResultCollector::new());
        let queue = TaskQueue::new(self.config.worker_concurrency, self.cancel.clone());

        let tasks = books.into_iter().map(|book| {
            let collector = collector.clone();
            let user = user.to_string();
            let reconciler = Arc::clone(self);
            async move {
                let outcome = reconciler.process_book(&user, &book).await;
                collector.record(outcome);
            }
        });
        queue.run_all(tasks).await;

        self.process_expired_sessions(user, &collector).await?;

        Ok(Arc::try_unwrap(collector).unwrap_or_else(|arc| {
            // Another clone is still alive (shouldn't happen once
            // `run_all`/`process_expired_sessions` have returned); fall
            // back to a defensive copy of the recorded outcomes.
            let fallback = ResultCollector::new();
            for outcome in arc.outcomes() {
                fallback.record(outcome);
            }
            fallback
        }))
    }

    #[tracing::instrument(skip(self, book), fields(user_id = %user, book_id = %book.id))]
    async fn process_book(&self, user: &str, book: &SourceBook) -> BookOutcome {
        let started = Instant::now();
        match self.process_book_inner(user, book).await {
            Ok(mut outcome) => {
                outcome.timing_ms = started.elapsed().as_millis() as u64;
                outcome
            }
            Err(err) => BookOutcome {
                book_ref: book.title.clone(),
                status: OutcomeStatus::Error,
                progress: ProgressSnapshot {
                    before: None,
                    after: book.progress_percentage,
                    changed: false,
                },
                identifiers: vec![],
                hardcover_edition_id: None,
                hardcover_format: None,
                action_text: "error".into(),
                api_response: None,
                reason: Some(err.to_string()),
                errors: vec![err.to_string()],
                timing_ms: started.elapsed().as_millis() as u64,
                timestamps: OutcomeTimestamps::default(),
            },
        }
    }

    fn candidate_identifiers(&self, book: &SourceBook) -> Vec<(Identifier, String)> {
        let title_norm = identifiers::normalize_title(&book.title);
        let mut out = Vec::new();
        if let Some(asin) = book.asin.as_deref().and_then(identifiers::normalize_asin) {
            out.push((Identifier::Asin(asin), title_norm.clone()));
        }
        if let Some(isbn) = book.isbn.as_deref().and_then(identifiers::normalize_isbn) {
            out.push((Identifier::Isbn(isbn), title_norm.clone()));
        }
        let key = identifiers::title_author_key(&book.title, &book.author);
        out.push((Identifier::TitleAuthor(key), title_norm));
        out
    }

    async fn process_book_inner(&self, user: &str, book: &SourceBook) -> anyhow::Result<BookOutcome> {
        // Step 1: early-skip optimization.
        for (identifier, title_norm) in self.candidate_identifiers(book) {
            if let Some(cached) = self.cache.get(user, &identifier, &title_norm).await? {
                let changed = self
                    .cache
                    .has_progress_changed(
                        user,
                        &identifier,
                        &title_norm,
                        book.progress_percentage,
                        progress::SIGNIFICANT_CHANGE_THRESHOLD,
                    )
                    .await?;
                if !changed {
                    return Ok(skipped_outcome(
                        book,
                        "Progress unchanged (optimized early check)",
                        Some(cached.last_progress_percent),
                    ));
                }
                return self.continue_pipeline(user, book, Some((identifier, title_norm)), Some(cached)).await;
            }
        }

        self.continue_pipeline(user, book, None, None).await
    }

    async fn continue_pipeline(
        &self,
        user: &str,
        book: &SourceBook,
        cached_identifier: Option<(Identifier, String)>,
        cached: Option<crate::model::CachedMapping>,
    ) -> anyhow::Result<BookOutcome> {
        // Step 2: match.
        let catalog = RemoteCatalog { remote: self.remote.as_ref() };
        let matcher = BookMatcher::new(&catalog);
        self.rate_limiter
            .wait_if_needed(
                HARDCOVER_SERVICE,
                RateLimiterConfig {
                    requests_per_second: (self.config.hardcover_rate_limit_per_minute / 60).max(1),
                    burst: self.config.hardcover_rate_limit_per_minute,
                },
            )
            .await;
        let found = matcher.resolve(book, cached.as_ref()).await?;

        let matched = match found {
            Some(m) => m,
            None => {
                if self.config.auto_add_books {
                    return self.auto_add(user, book).await;
                }
                return Ok(skipped_outcome(book, "no identifier and no match", None));
            }
        };

        // Step 3: identifier for cache-write (ASIN > ISBN > title/author).
        let (identifier, title_norm) = cached_identifier.unwrap_or_else(|| {
            self.candidate_identifiers(book)
                .into_iter()
                .find(|(id, _)| matches!(id, Identifier::Asin(_) | Identifier::Isbn(_)))
                .unwrap_or_else(|| {
                    let title_norm = identifiers::normalize_title(&book.title);
                    (
                        Identifier::TitleAuthor(identifiers::title_author_key(&book.title, &book.author)),
                        title_norm,
                    )
                })
        });

        // Step 5: progress computation.
        let target_percent = progress::validate(
            Some(book.progress_percentage),
            &ValidateOptions {
                is_finished: Some(book.is_finished),
                format: Some(book.format_hint),
                current_time_seconds: book.current_time_seconds,
                duration_seconds: matched.edition.audio_seconds,
            },
        )
        .unwrap_or(0.0);

        let is_completion = progress::is_complete(
            target_percent,
            &CompletionOptions {
                is_finished: Some(book.is_finished),
                threshold: None,
                format: Some(book.format_hint),
                current_time_seconds: book.current_time_seconds,
                duration_seconds: matched.edition.audio_seconds,
                current_page: book.pages.map(|total| {
                    progress::current_position(target_percent, total as f64, PositionKind::Pages) as u32
                }),
                total_pages: book.pages,
            },
        );

        // Step 6: regression gate.
        let old_progress = cached.as_ref().map(|c| c.last_progress_percent);
        let regression = progress::analyze_regression(old_progress, target_percent, RegressionOptions::default());
        if regression.should_block {
            return Ok(BookOutcome {
                book_ref: book.title.clone(),
                status: OutcomeStatus::Error,
                progress: ProgressSnapshot {
                    before: old_progress,
                    after: target_percent,
                    changed: true,
                },
                identifiers: vec![identifier],
                hardcover_edition_id: Some(matched.edition.edition_id),
                hardcover_format: Some(matched.edition.format),
                action_text: "regression_blocked".into(),
                api_response: None,
                reason: Some(format!(
                    "Major regression blocked, {:.1}% drop",
                    regression.drop
                )),
                errors: vec![SyncError::RegressionBlocked(format!("{:.1}% drop", regression.drop)).to_string()],
                timing_ms: 0,
                timestamps: OutcomeTimestamps::default(),
            });
        }
        if regression.should_warn {
            tracing::warn!(book = %book.title, drop = regression.drop, "progress regression within tolerance");
        }

        // Step 7: session gate.
        let session_mgr = SessionManager::new(self.config.session);
        let session_started = cached.as_ref().and_then(|c| c.last_hardcover_sync_ts);
        let decision = session_mgr.should_delay(
            old_progress.unwrap_or(0.0),
            target_percent,
            is_completion,
            session_started,
            Utc::now(),
        );

        if matches!(decision, SessionDecision::Delay) {
            self.cache
                .store_mapping(
                    user,
                    &identifier,
                    &title_norm,
                    &identifiers::normalize_author(&book.author),
                    matched.edition.edition_id,
                    matched.book_id,
                )
                .await?;
            self.cache
                .update_session(user, &identifier, &title_norm, target_percent)
                .await?;
            return Ok(skipped_outcome(book, "delayed_until_session_expiry", old_progress));
        }

        self.sync_now(user, book, &identifier, &title_norm, &matched, target_percent, is_completion, old_progress)
            .await
    }

    /// Section 4.8 step 8, factored out so `process_expired_sessions` can
    /// emit the same real remote mutation for a flushed session instead
    /// of only touching the cache. Resolves (and if needed creates) the
    /// remote user_book, then issues `update_progress`/`mark_complete`
    /// under rate-limit/retry discipline with a LIFO rollback on failure.
    async fn sync_fn(
        &self,
        book_id: i64,
        edition_id: i64,
        target_percent: f64,
        is_completion: bool,
        target_position: Option<TargetPosition>,
    ) -> anyhow::Result<ApiResponseInfo> {
        let mut tx = Transaction::new();
        let user_book_id = match self.remote.get_user_book(book_id).await? {
            Some(ub) => ub.user_book_id,
            None => {
                let mut created_id = None;
                tx.add(
                    "add_book_to_library",
                    || async {
                        let (id, _) = self.remote.add_book_to_library(book_id, edition_id, target_percent).await?;
                        created_id = Some(id);
                        Ok(())
                    },
                    move || async move {
                        tracing::warn!(book_id, edition_id, "cannot undo add_book_to_library: remote service exposes no removal endpoint");
                        Ok(())
                    },
                )
                .await?;
                created_id.expect("action sets created_id on success")
            }
        };

        let api_response = self
            .retry
            .run(|| async {
                self.rate_limiter
                    .wait_if_needed(
                        HARDCOVER_SERVICE,
                        RateLimiterConfig {
                            requests_per_second: (self.config.hardcover_rate_limit_per_minute / 60).max(1),
                            burst: self.config.hardcover_rate_limit_per_minute,
                        },
                    )
                    .await;
                let result = if is_completion {
                    self.remote.mark_complete(user_book_id, edition_id, Utc::now()).await
                } else {
                    let (seconds, pages) = match target_position {
                        Some(TargetPosition::Seconds(s)) => (Some(s), None),
                        Some(TargetPosition::Pages(p)) => (None, Some(p)),
                        None => (None, None),
                    };
                    self.remote.update_progress(user_book_id, edition_id, target_percent, seconds, pages).await
                };
                result.map_err(|e| SyncError::RemoteMutationFailed(e.to_string()))
            })
            .await;

        let api_response = match api_response {
            Ok(resp) => resp,
            Err(err) => {
                tx.rollback().await.ok();
                anyhow::bail!(err);
            }
        };

        if !api_response.success {
            tx.rollback().await.ok();
            anyhow::bail!(SyncError::RemoteMutationFailed("remote returned unsuccessful status".into()));
        }

        tx.commit();
        Ok(api_response)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_now(
        &self,
        user: &str,
        book: &SourceBook,
        identifier: &Identifier,
        title_norm: &str,
        matched: &Match,
        target_percent: f64,
        is_completion: bool,
        old_progress: Option<f64>,
    ) -> anyhow::Result<BookOutcome> {
        let target_position = match book.format_hint {
            crate::model::BookFormat::Audiobook => matched
                .edition
                .audio_seconds
                .map(|total| TargetPosition::Seconds(progress::current_position(target_percent, total, PositionKind::Seconds))),
            _ => book
                .pages
                .map(|total| TargetPosition::Pages(progress::current_position(target_percent, total as f64, PositionKind::Pages) as u32)),
        };

        let api_response = self
            .sync_fn(matched.book_id, matched.edition.edition_id, target_percent, is_completion, target_position)
            .await?;

        self.cache
            .store_mapping(
                user,
                identifier,
                title_norm,
                &identifiers::normalize_author(&book.author),
                matched.edition.edition_id,
                matched.book_id,
            )
            .await
            .map_err(|e| SyncError::CacheWriteFailed(e.to_string()))?;
        self.cache
            .record_sync(user, identifier, title_norm, target_percent, Utc::now())
            .await
            .map_err(|e| SyncError::CacheWriteFailed(e.to_string()))?;

        let status = if is_completion {
            OutcomeStatus::Completed
        } else {
            OutcomeStatus::Synced
        };

        Ok(BookOutcome {
            book_ref: book.title.clone(),
            status,
            progress: ProgressSnapshot {
                before: old_progress,
                after: target_percent,
                changed: true,
            },
            identifiers: vec![identifier.clone()],
            hardcover_edition_id: Some(matched.edition.edition_id),
            hardcover_format: Some(matched.edition.format),
            action_text: if is_completion { "completed".into() } else { "synced".into() },
            api_response: Some(api_response),
            reason: None,
            errors: vec![],
            timing_ms: 0,
            timestamps: OutcomeTimestamps {
                last_listened_at: book.last_listened_at,
                completed_at: if is_completion { Some(Utc::now()) } else { None },
            },
        })
    }

    async fn auto_add(&self, user: &str, book: &SourceBook) -> anyhow::Result<BookOutcome> {
        let catalog = RemoteCatalog { remote: self.remote.as_ref() };
        let editions = catalog
            .search_by_title_author(&book.title, &book.author)
            .await?;
        let Some(edition) = editions.into_iter().next() else {
            return Ok(skipped_outcome(book, "no identifier and no match", None));
        };

        let target_percent = progress::validate(
            Some(book.progress_percentage),
            &ValidateOptions {
                is_finished: Some(book.is_finished),
                format: Some(book.format_hint),
                current_time_seconds: book.current_time_seconds,
                duration_seconds: edition.audio_seconds,
            },
        )
        .unwrap_or(0.0);

        match self
            .remote
            .add_book_to_library(edition.book_id, edition.edition_id, target_percent)
            .await
        {
            Ok((_, api_response)) => {
                let title_norm = identifiers::normalize_title(&book.title);
                let identifier = Identifier::TitleAuthor(identifiers::title_author_key(&book.title, &book.author));
                self.cache
                    .store_mapping(
                        user,
                        &identifier,
                        &title_norm,
                        &identifiers::normalize_author(&book.author),
                        edition.edition_id,
                        edition.book_id,
                    )
                    .await?;
                self.cache
                    .record_sync(user, &identifier, &title_norm, target_percent, Utc::now())
                    .await?;
                Ok(BookOutcome {
                    book_ref: book.title.clone(),
                    status: OutcomeStatus::AutoAdded,
                    progress: ProgressSnapshot {
                        before: None,
                        after: target_percent,
                        changed: true,
                    },
                    identifiers: vec![identifier],
                    hardcover_edition_id: Some(edition.edition_id),
                    hardcover_format: Some(edition.format),
                    action_text: "auto_added".into(),
                    api_response: Some(api_response),
                    reason: None,
                    errors: vec![],
                    timing_ms: 0,
                    timestamps: OutcomeTimestamps::default(),
                })
            }
            Err(err) => anyhow::bail!(SyncError::RemoteMutationFailed(err.to_string())),
        }
    }

    async fn process_expired_sessions(&self, user: &str, collector: &ResultCollector) -> anyhow::Result<()> {
        let session_mgr = SessionManager::new(self.config.session);
        let expired = self
            .cache
            .expired_sessions(user, self.config.session.session_timeout_s as i64)
            .await?;
        for row in expired {
            let Some(pending) = row.session_pending_progress else {
                continue;
            };
            let Some(last_update) = row.session_last_update_ts else {
                continue;
            };
            if !session_mgr.has_expired(last_update, Utc::now()) {
                continue;
            }
            let identifier = match row.identifier_kind {
                crate::model::IdentifierKind::Asin => Identifier::Asin(row.identifier_value.clone()),
                crate::model::IdentifierKind::Isbn => Identifier::Isbn(row.identifier_value.clone()),
                crate::model::IdentifierKind::TitleAuthor => Identifier::TitleAuthor(row.identifier_value.clone()),
            };

            // A delayed session is never a completion (is_completion always
            // routes to sync_now in SessionManager::should_delay), and the
            // cached row carries no format/duration detail to derive a
            // time/page position from, so this is always a plain progress
            // update with no position detail (I2: this must be a real
            // remote mutation, not just a cache write).
            let mutation = self.sync_fn(row.book_id, row.edition_id, pending, false, None).await;
            let api_response = match mutation {
                Ok(resp) => resp,
                Err(err) => {
                    collector.record(BookOutcome {
                        book_ref: row.title_norm.clone(),
                        status: OutcomeStatus::Error,
                        progress: ProgressSnapshot {
                            before: Some(row.last_progress_percent),
                            after: pending,
                            changed: true,
                        },
                        identifiers: vec![identifier],
                        hardcover_edition_id: Some(row.edition_id),
                        hardcover_format: None,
                        action_text: "error".into(),
                        api_response: None,
                        reason: Some(err.to_string()),
                        errors: vec![err.to_string()],
                        timing_ms: 0,
                        timestamps: OutcomeTimestamps::default(),
                    });
                    continue;
                }
            };

            self.cache
                .complete_session(user, &identifier, &row.title_norm, pending)
                .await?;
            collector.record(BookOutcome {
                book_ref: row.title_norm.clone(),
                status: OutcomeStatus::Synced,
                progress: ProgressSnapshot {
                    before: Some(row.last_progress_percent),
                    after: pending,
                    changed: true,
                },
                identifiers: vec![identifier],
                hardcover_edition_id: Some(row.edition_id),
                hardcover_format: None,
                action_text: "synced".into(),
                api_response: Some(api_response),
                reason: Some("session expired, pending progress flushed".into()),
                errors: vec![],
                timing_ms: 0,
                timestamps: OutcomeTimestamps::default(),
            });
        }
        Ok(())
    }
}

fn skipped_outcome(book: &SourceBook, reason: &str, before: Option<f64>) -> BookOutcome {
    BookOutcome {
        book_ref: book.title.clone(),
        status: OutcomeStatus::Skipped,
        progress: ProgressSnapshot {
            before,
            after: book.progress_percentage,
            changed: false,
        },
        identifiers: vec![],
        hardcover_edition_id: None,
        hardcover_format: None,
        action_text: "skipped".into(),
        api_response: None,
        reason: Some(reason.to_string()),
        errors: vec![],
        timing_ms: 0,
        timestamps: OutcomeTimestamps::default(),
    }
}
