use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CachedMapping::Table)
                    .if_not_exists()
                    .col(uuid(CachedMapping::Id).primary_key())
                    .col(string(CachedMapping::UserId))
                    .col(string(CachedMapping::IdentifierKind))
                    .col(string(CachedMapping::IdentifierValue))
                    .col(string(CachedMapping::TitleNorm))
                    .col(string(CachedMapping::AuthorNorm))
                    .col(big_integer(CachedMapping::EditionId))
                    .col(big_integer(CachedMapping::BookId))
                    .col(double(CachedMapping::LastProgressPercent))
                    .col(timestamp_with_time_zone_null(
                        CachedMapping::LastHardcoverSyncTs,
                    ))
                    .col(double_null(CachedMapping::SessionPendingProgress))
                    .col(timestamp_with_time_zone_null(
                        CachedMapping::SessionLastUpdateTs,
                    ))
                    .col(timestamp_with_time_zone(CachedMapping::CreatedAt))
                    .col(timestamp_with_time_zone(CachedMapping::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // I1: at most one row per (user, identifier_kind, identifier_value, title_norm).
        manager
            .create_index(
                Index::create()
                    .name("ux_cached_mapping_identity")
                    .table(CachedMapping::Table)
                    .col(CachedMapping::UserId)
                    .col(CachedMapping::IdentifierKind)
                    .col(CachedMapping::IdentifierValue)
                    .col(CachedMapping::TitleNorm)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Speeds up the "expired sessions for user" scan (section 4.4).
        manager
            .create_index(
                Index::create()
                    .name("ix_cached_mapping_session_scan")
                    .table(CachedMapping::Table)
                    .col(CachedMapping::UserId)
                    .col(CachedMapping::SessionLastUpdateTs)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CachedMapping::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CachedMapping {
    Table,
    Id,
    UserId,
    IdentifierKind,
    IdentifierValue,
    TitleNorm,
    AuthorNorm,
    EditionId,
    BookId,
    LastProgressPercent,
    LastHardcoverSyncTs,
    SessionPendingProgress,
    SessionLastUpdateTs,
    CreatedAt,
    UpdatedAt,
}
