//! Migration to create the published_videos table.
//!
//! Each row aggregates the per-platform publish results for one content item in
//! a JSON map keyed by platform name.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PublishedVideos::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PublishedVideos::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PublishedVideos::UserId).uuid().not_null())
                    .col(ColumnDef::new(PublishedVideos::Title).text().null())
                    .col(ColumnDef::new(PublishedVideos::VideoUrl).text().not_null())
                    .col(
                        ColumnDef::new(PublishedVideos::Platforms)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PublishedVideos::OverallStatus)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(PublishedVideos::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(PublishedVideos::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PublishedVideos::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_published_videos_user_id")
                    .table(PublishedVideos::Table)
                    .col(PublishedVideos::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_published_videos_user_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PublishedVideos::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PublishedVideos {
    Table,
    Id,
    UserId,
    Title,
    VideoUrl,
    Platforms,
    OverallStatus,
    Version,
    CreatedAt,
    UpdatedAt,
}
