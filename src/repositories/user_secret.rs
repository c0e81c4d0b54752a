//! Repository for encrypted user secrets and the credential audit trail.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::Sealed;
use crate::error::is_unique_conflict;
use crate::models::credential_audit_log::{self, Entity as CredentialAuditLog};
use crate::models::user_secret::{self, Entity as UserSecret};

/// Repository for `user_secrets` rows
#[derive(Debug, Clone)]
pub struct UserSecretRepository {
    db: Arc<DatabaseConnection>,
}

impl UserSecretRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(&self, user_id: Uuid, service_name: &str) -> Result<Option<user_secret::Model>> {
        Ok(UserSecret::find()
            .filter(user_secret::Column::UserId.eq(user_id))
            .filter(user_secret::Column::ServiceName.eq(service_name))
            .one(&*self.db)
            .await?)
    }

    /// Inserts or replaces the secret for `(user_id, service_name)`
    pub async fn upsert(&self, user_id: Uuid, service_name: &str, sealed: &Sealed) -> Result<()> {
        for _ in 0..2 {
            let now = Utc::now();
            if let Some(existing) = self.find(user_id, service_name).await? {
                UserSecret::update_many()
                    .set(user_secret::ActiveModel {
                        ciphertext: Set(sealed.ciphertext.clone()),
                        iv: Set(sealed.iv.clone()),
                        updated_at: Set(now),
                        ..Default::default()
                    })
                    .filter(user_secret::Column::Id.eq(existing.id))
                    .exec(&*self.db)
                    .await?;
                return Ok(());
            }

            let active = user_secret::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(user_id),
                service_name: Set(service_name.to_string()),
                ciphertext: Set(sealed.ciphertext.clone()),
                iv: Set(sealed.iv.clone()),
                last_used_at: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };

            match UserSecret::insert(active)
                .exec_without_returning(&*self.db)
                .await
            {
                Ok(_) => return Ok(()),
                // Lost a race with a concurrent insert; update on the next pass
                Err(err) if is_unique_conflict(&err) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(anyhow!("secret for service '{}' kept changing concurrently", service_name))
    }

    pub async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        UserSecret::update_many()
            .set(user_secret::ActiveModel {
                last_used_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(user_secret::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, user_id: Uuid, service_name: &str) -> Result<bool> {
        let result = UserSecret::delete_many()
            .filter(user_secret::Column::UserId.eq(user_id))
            .filter(user_secret::Column::ServiceName.eq(service_name))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

/// One audit row to be written
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub user_id: Uuid,
    pub service_name: String,
    pub operation: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Repository for `credential_audit_logs` rows
#[derive(Debug, Clone)]
pub struct CredentialAuditRepository {
    db: Arc<DatabaseConnection>,
}

impl CredentialAuditRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn insert(&self, record: AuditRecord) -> Result<()> {
        let active = credential_audit_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(record.user_id),
            service_name: Set(record.service_name),
            operation: Set(record.operation),
            success: Set(record.success),
            error_message: Set(record.error_message),
            ip_address: Set(record.ip_address),
            user_agent: Set(record.user_agent),
            created_at: Set(Utc::now()),
        };

        CredentialAuditLog::insert(active)
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    /// Audit rows for a user, oldest first
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<credential_audit_log::Model>> {
        Ok(CredentialAuditLog::find()
            .filter(credential_audit_log::Column::UserId.eq(user_id))
            .order_by_asc(credential_audit_log::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}
