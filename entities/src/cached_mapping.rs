//! Persisted `(user, identifier, title)` -> remote edition mapping.
//!
//! Mirrors `CachedMapping` in the engine's data model (spec section 3):
//! one row per book the reconciler has successfully matched against the
//! remote catalog, keyed so that at most one row exists per
//! `(user_id, identifier_kind, identifier_value, title_norm)` tuple (I1).

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize, serde::Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum IdentifierKind {
    #[sea_orm(string_value = "asin")]
    Asin,
    #[sea_orm(string_value = "isbn")]
    Isbn,
    #[sea_orm(string_value = "title_author")]
    TitleAuthor,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize, serde::Deserialize)]
#[sea_orm(table_name = "cached_mapping")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: String,
    pub identifier_kind: IdentifierKind,
    pub identifier_value: String,
    pub title_norm: String,
    pub author_norm: String,

    pub edition_id: i64,
    pub book_id: i64,

    pub last_progress_percent: f64,
    pub last_hardcover_sync_ts: Option<DateTimeUtc>,

    pub session_pending_progress: Option<f64>,
    pub session_last_update_ts: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
