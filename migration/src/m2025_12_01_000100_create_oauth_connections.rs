//! Migration to create the oauth_connections table.
//!
//! One row per user and platform holding encrypted OAuth tokens, the resolved
//! platform identity and a version counter used for optimistic concurrency.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuthConnections::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuthConnections::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuthConnections::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(OAuthConnections::PlatformName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::AccessTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::AccessTokenIv)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::RefreshTokenIv)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::TokenExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::ConnectionStatus)
                            .text()
                            .not_null()
                            .default("connected"),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::PlatformUserId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::PlatformUsername)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::Scopes)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::ConnectionMetadata)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(OAuthConnections::UpdatedAt)
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
                    .name("idx_oauth_connections_user_platform")
                    .table(OAuthConnections::Table)
                    .col(OAuthConnections::UserId)
                    .col(OAuthConnections::PlatformName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth_connections_user_platform")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(OAuthConnections::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OAuthConnections {
    #[sea_orm(iden = "oauth_connections")]
    Table,
    Id,
    UserId,
    PlatformName,
    AccessTokenCiphertext,
    AccessTokenIv,
    RefreshTokenCiphertext,
    RefreshTokenIv,
    TokenExpiresAt,
    ConnectionStatus,
    PlatformUserId,
    PlatformUsername,
    Scopes,
    ConnectionMetadata,
    Version,
    LastUsedAt,
    CreatedAt,
    UpdatedAt,
}
