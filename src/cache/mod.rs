//! Component D — BookCache.
//!
//! A persistent keyed store over `(user_id, identifier_kind,
//! identifier_value, title_norm)`, backed by sea-orm. Readers may run
//! concurrently; writes for a given key are serialized by the database's
//! unique index (I1) plus an in-process per-key lock so two workers
//! racing on the same brand-new identifier don't both try to insert.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entities::cached_mapping::{self, IdentifierKind as EntityIdentifierKind};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{CachedMapping, Identifier, IdentifierKind};
use crate::progress::detect_change;

#[async_trait]
pub trait BookCache: Send + Sync {
    async fn get(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
    ) -> anyhow::Result<Option<CachedMapping>>;

    async fn has_progress_changed(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        new_pct: f64,
        threshold: f64,
    ) -> anyhow::Result<bool>;

    async fn store_mapping(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        author_norm: &str,
        edition_id: i64,
        book_id: i64,
    ) -> anyhow::Result<()>;

    async fn record_sync(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        progress: f64,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn update_session(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        progress: f64,
    ) -> anyhow::Result<()>;

    async fn complete_session(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        final_progress: f64,
    ) -> anyhow::Result<()>;

    async fn expired_sessions(
        &self,
        user_id: &str,
        timeout_s: i64,
    ) -> anyhow::Result<Vec<CachedMapping>>;
}

fn entity_kind(kind: IdentifierKind) -> EntityIdentifierKind {
    match kind {
        IdentifierKind::Asin => EntityIdentifierKind::Asin,
        IdentifierKind::Isbn => EntityIdentifierKind::Isbn,
        IdentifierKind::TitleAuthor => EntityIdentifierKind::TitleAuthor,
    }
}

fn domain_kind(kind: &EntityIdentifierKind) -> IdentifierKind {
    match kind {
        EntityIdentifierKind::Asin => IdentifierKind::Asin,
        EntityIdentifierKind::Isbn => IdentifierKind::Isbn,
        EntityIdentifierKind::TitleAuthor => IdentifierKind::TitleAuthor,
    }
}

fn to_domain(model: cached_mapping::Model) -> CachedMapping {
    CachedMapping {
        user_id: model.user_id,
        identifier_kind: domain_kind(&model.identifier_kind),
        identifier_value: model.identifier_value,
        title_norm: model.title_norm,
        author_norm: model.author_norm,
        edition_id: model.edition_id,
        book_id: model.book_id,
        last_progress_percent: model.last_progress_percent,
        last_hardcover_sync_ts: model.last_hardcover_sync_ts.map(|t| t.with_timezone(&Utc)),
        session_pending_progress: model.session_pending_progress,
        session_last_update_ts: model.session_last_update_ts.map(|t| t.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

/// sea-orm-backed implementation of the `BookCache` trait.
pub struct SeaOrmBookCache {
    db: Arc<DatabaseConnection>,
    /// Serializes upserts per `(user, identifier_kind, value, title_norm)`
    /// key so racing workers on a never-before-seen key don't both race
    /// the unique-index insert.
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SeaOrmBookCache {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for_key(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn find_row(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
    ) -> anyhow::Result<Option<cached_mapping::Model>> {
        let row = cached_mapping::Entity::find()
            .filter(cached_mapping::Column::UserId.eq(user_id))
            .filter(cached_mapping::Column::IdentifierKind.eq(entity_kind(identifier.kind())))
            .filter(cached_mapping::Column::IdentifierValue.eq(identifier.value()))
            .filter(cached_mapping::Column::TitleNorm.eq(title_norm))
            .one(self.db.as_ref())
            .await?;
        Ok(row)
    }

    fn key(user_id: &str, identifier: &Identifier, title_norm: &str) -> String {
        format!(
            "{user_id}|{}|{}|{title_norm}",
            identifier.kind().as_str(),
            identifier.value()
        )
    }
}

#[async_trait]
impl BookCache for SeaOrmBookCache {
    async fn get(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
    ) -> anyhow::Result<Option<CachedMapping>> {
        Ok(self
            .find_row(user_id, identifier, title_norm)
            .await?
            .map(to_domain))
    }

    async fn has_progress_changed(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        new_pct: f64,
        threshold: f64,
    ) -> anyhow::Result<bool> {
        let existing = self.get(user_id, identifier, title_norm).await?;
        match existing {
            None => Ok(true),
            Some(row) => {
                let change = detect_change(row.last_progress_percent, new_pct, threshold);
                Ok(change.has_change)
            }
        }
    }

    async fn store_mapping(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        author_norm: &str,
        edition_id: i64,
        book_id: i64,
    ) -> anyhow::Result<()> {
        let key = Self::key(user_id, identifier, title_norm);
        let lock = self.lock_for_key(&key).await;
        let _guard = lock.lock().await;

        let now = Utc::now().into();
        match self.find_row(user_id, identifier, title_norm).await? {
            Some(existing) => {
                let mut am: cached_mapping::ActiveModel = existing.into();
                am.author_norm = Set(author_norm.to_string());
                am.edition_id = Set(edition_id);
                am.book_id = Set(book_id);
                am.updated_at = Set(now);
                am.update(self.db.as_ref()).await?;
            }
            None => {
                let am = cached_mapping::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id.to_string()),
                    identifier_kind: Set(entity_kind(identifier.kind())),
                    identifier_value: Set(identifier.value().to_string()),
                    title_norm: Set(title_norm.to_string()),
                    author_norm: Set(author_norm.to_string()),
                    edition_id: Set(edition_id),
                    book_id: Set(book_id),
                    last_progress_percent: Set(0.0),
                    last_hardcover_sync_ts: Set(None),
                    session_pending_progress: Set(None),
                    session_last_update_ts: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                am.insert(self.db.as_ref()).await?;
            }
        }
        Ok(())
    }

    async fn record_sync(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        progress: f64,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let key = Self::key(user_id, identifier, title_norm);
        let lock = self.lock_for_key(&key).await;
        let _guard = lock.lock().await;

        let row = self
            .find_row(user_id, identifier, title_norm)
            .await?
            .ok_or_else(|| anyhow::anyhow!("record_sync called before store_mapping"))?;
        let mut am: cached_mapping::ActiveModel = row.into();
        am.last_progress_percent = Set(progress);
        am.last_hardcover_sync_ts = Set(Some(ts.into()));
        am.session_pending_progress = Set(None);
        am.session_last_update_ts = Set(None);
        am.updated_at = Set(Utc::now().into());
        am.update(self.db.as_ref()).await?;
        Ok(())
    }

    async fn update_session(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        progress: f64,
    ) -> anyhow::Result<()> {
        let key = Self::key(user_id, identifier, title_norm);
        let lock = self.lock_for_key(&key).await;
        let _guard = lock.lock().await;

        let row = self
            .find_row(user_id, identifier, title_norm)
            .await?
            .ok_or_else(|| anyhow::anyhow!("update_session called before store_mapping"))?;
        let mut am: cached_mapping::ActiveModel = row.into();
        am.session_pending_progress = Set(Some(progress));
        am.session_last_update_ts = Set(Some(Utc::now().into()));
        am.updated_at = Set(Utc::now().into());
        am.update(self.db.as_ref()).await?;
        Ok(())
    }

    async fn complete_session(
        &self,
        user_id: &str,
        identifier: &Identifier,
        title_norm: &str,
        final_progress: f64,
    ) -> anyhow::Result<()> {
        self.record_sync(user_id, identifier, title_norm, final_progress, Utc::now())
            .await
    }

    async fn expired_sessions(
        &self,
        user_id: &str,
        timeout_s: i64,
    ) -> anyhow::Result<Vec<CachedMapping>> {
        let rows = cached_mapping::Entity::find()
            .filter(cached_mapping::Column::UserId.eq(user_id))
            .filter(cached_mapping::Column::SessionPendingProgress.is_not_null())
            .all(self.db.as_ref())
            .await?;

        let now = Utc::now();
        let expired = rows
            .into_iter()
            .filter(|r| {
                r.session_last_update_ts
                    .map(|ts| (now - ts.with_timezone(&Utc)).num_seconds() >= timeout_s)
                    .unwrap_or(false)
            })
            .map(to_domain)
            .collect();
        Ok(expired)
    }
}
