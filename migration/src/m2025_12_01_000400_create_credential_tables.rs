//! Migration to create the user_secrets and credential_audit_logs tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserSecrets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserSecrets::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserSecrets::UserId).uuid().not_null())
                    .col(ColumnDef::new(UserSecrets::ServiceName).text().not_null())
                    .col(ColumnDef::new(UserSecrets::Ciphertext).binary().not_null())
                    .col(ColumnDef::new(UserSecrets::Iv).binary().not_null())
                    .col(
                        ColumnDef::new(UserSecrets::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(UserSecrets::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(UserSecrets::UpdatedAt)
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
                    .name("idx_user_secrets_user_service")
                    .table(UserSecrets::Table)
                    .col(UserSecrets::UserId)
                    .col(UserSecrets::ServiceName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CredentialAuditLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CredentialAuditLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CredentialAuditLogs::UserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CredentialAuditLogs::ServiceName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CredentialAuditLogs::Operation)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CredentialAuditLogs::Success)
                            .boolean()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CredentialAuditLogs::ErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(CredentialAuditLogs::IpAddress).text().null())
                    .col(ColumnDef::new(CredentialAuditLogs::UserAgent).text().null())
                    .col(
                        ColumnDef::new(CredentialAuditLogs::CreatedAt)
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
                    .name("idx_credential_audit_logs_user_id")
                    .table(CredentialAuditLogs::Table)
                    .col(CredentialAuditLogs::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CredentialAuditLogs::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(UserSecrets::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserSecrets {
    Table,
    Id,
    UserId,
    ServiceName,
    Ciphertext,
    Iv,
    LastUsedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum CredentialAuditLogs {
    Table,
    Id,
    UserId,
    ServiceName,
    Operation,
    Success,
    ErrorMessage,
    IpAddress,
    UserAgent,
    CreatedAt,
}
