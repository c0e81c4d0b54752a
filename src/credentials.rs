//! Credential Store
//!
//! The single encryption boundary of the service. User secrets and OAuth
//! tokens are sealed with the master key here and nowhere else; callers only
//! ever see plaintext through [`CredentialStore::read_secret`] and
//! [`CredentialStore::open_tokens`].
//!
//! Every secret and OAuth token save, read and delete writes an audit row
//! from a detached task.
//! Audit failures are logged and counted but never fail the operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{AppConfig, ConfigError};
use crate::crypto::{self, MasterKey, Sealed};
use crate::error::{ApiError, configuration_error};
use crate::models::oauth_connection;
use crate::platforms::TokenSet;
use crate::repositories::{
    AuditRecord, ConnectionRepository, CredentialAuditRepository, UserSecretRepository,
};

/// Operator hint returned with configuration failures
pub const MASTER_KEY_HINT: &str = "set PUBLISHER_MASTER_KEY to 64 hex characters";

#[derive(Debug, Error)]
pub enum CredentialError {
    /// The master key is missing or malformed.
    #[error("credential storage is not configured: {0}")]
    Configuration(String),
    /// Not found, undecryptable, or otherwise unusable. Intentionally vague.
    #[error("credential not found or invalid")]
    NotFoundOrInvalid,
    #[error("credential storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Request origin captured for audit rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    Create,
    Read,
    Delete,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Create => "create",
            AuditOperation::Read => "read",
            AuditOperation::Delete => "delete",
        }
    }
}

/// Presence of a stored secret; never carries plaintext
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SecretStatus {
    pub service: String,
    pub configured: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Encrypted OAuth tokens ready to be persisted on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedTokens {
    pub access: Sealed,
    pub refresh: Option<Sealed>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Encrypts, decrypts and audits stored credentials
#[derive(Clone)]
pub struct CredentialStore {
    key: Result<MasterKey, String>,
    secrets: UserSecretRepository,
    audit: CredentialAuditRepository,
    connections: ConnectionRepository,
    audit_tasks: TaskTracker,
}

impl CredentialStore {
    /// Resolves the master key from config once. A bad key does not fail
    /// construction; every operation reports it instead.
    pub fn new(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        let key = match config.master_key.as_deref() {
            None => Err(ConfigError::MissingMasterKey.to_string()),
            Some(hex) => MasterKey::from_hex(hex).map_err(|err| {
                ConfigError::InvalidMasterKey {
                    reason: err.to_string(),
                }
                .to_string()
            }),
        };

        if let Err(reason) = &key {
            tracing::error!(%reason, "Credential store is unavailable until the master key is fixed");
        }

        Self::from_parts(db, key)
    }

    /// Builds a store around an already-parsed key
    pub fn with_key(db: Arc<DatabaseConnection>, key: MasterKey) -> Self {
        Self::from_parts(db, Ok(key))
    }

    fn from_parts(db: Arc<DatabaseConnection>, key: Result<MasterKey, String>) -> Self {
        Self {
            key,
            secrets: UserSecretRepository::new(db.clone()),
            audit: CredentialAuditRepository::new(db.clone()),
            connections: ConnectionRepository::new(db),
            audit_tasks: TaskTracker::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_ok()
    }

    fn key(&self) -> Result<&MasterKey, CredentialError> {
        self.key
            .as_ref()
            .map_err(|reason| CredentialError::Configuration(reason.clone()))
    }

    /// Encrypts and stores a secret for `(user_id, service)`
    pub async fn save_secret(
        &self,
        user_id: Uuid,
        service: &str,
        plaintext: &str,
        client: &ClientContext,
    ) -> Result<(), CredentialError> {
        let result: Result<(), CredentialError> = async {
            let key = self.key()?;
            let sealed = crypto::encrypt_str(key, secret_aad(user_id, service).as_bytes(), plaintext)
                .map_err(|err| CredentialError::Storage(err.into()))?;
            self.secrets.upsert(user_id, service, &sealed).await?;
            Ok(())
        }
        .await;

        self.audit(user_id, service, AuditOperation::Create, &result, client);
        result
    }

    /// Decrypts a stored secret and records the read
    pub async fn read_secret(
        &self,
        user_id: Uuid,
        service: &str,
        client: &ClientContext,
    ) -> Result<String, CredentialError> {
        let result: Result<String, CredentialError> = async {
            let key = self.key()?;
            let row = self
                .secrets
                .find(user_id, service)
                .await?
                .ok_or(CredentialError::NotFoundOrInvalid)?;

            let plaintext = crypto::decrypt_str(
                key,
                secret_aad(user_id, service).as_bytes(),
                &row.ciphertext,
                &row.iv,
            )
            .map_err(|_| CredentialError::NotFoundOrInvalid)?;

            if let Err(err) = self.secrets.touch_last_used(row.id).await {
                tracing::warn!(%user_id, service, error = %err, "Failed to update secret last_used_at");
            }
            Ok(plaintext)
        }
        .await;

        self.audit(user_id, service, AuditOperation::Read, &result, client);
        result
    }

    /// Removes a stored secret; `Ok(false)` when none existed
    pub async fn delete_secret(
        &self,
        user_id: Uuid,
        service: &str,
        client: &ClientContext,
    ) -> Result<bool, CredentialError> {
        let result = self
            .secrets
            .delete(user_id, service)
            .await
            .map_err(CredentialError::from);

        self.audit(user_id, service, AuditOperation::Delete, &result, client);
        result
    }

    /// Reports whether a secret is stored, without decrypting it
    pub async fn secret_status(
        &self,
        user_id: Uuid,
        service: &str,
    ) -> Result<SecretStatus, CredentialError> {
        let row = self.secrets.find(user_id, service).await?;
        Ok(SecretStatus {
            service: service.to_string(),
            configured: row.is_some(),
            last_used_at: row.as_ref().and_then(|r| r.last_used_at),
            updated_at: row.as_ref().map(|r| r.updated_at),
        })
    }

    /// Encrypts OAuth tokens for a `(user_id, platform)` connection and
    /// records the write under `oauth:{platform}`
    pub fn seal_tokens(
        &self,
        user_id: Uuid,
        platform: &str,
        tokens: &TokenSet,
        client: &ClientContext,
    ) -> Result<SealedTokens, CredentialError> {
        let result = self.seal_tokens_inner(user_id, platform, tokens);
        self.audit(
            user_id,
            &token_service(platform),
            AuditOperation::Create,
            &result,
            client,
        );
        result
    }

    fn seal_tokens_inner(
        &self,
        user_id: Uuid,
        platform: &str,
        tokens: &TokenSet,
    ) -> Result<SealedTokens, CredentialError> {
        let key = self.key()?;
        let aad = token_aad(user_id, platform);

        let access = crypto::encrypt_str(key, aad.as_bytes(), &tokens.access_token)
            .map_err(|err| CredentialError::Storage(err.into()))?;
        let refresh = tokens
            .refresh_token
            .as_deref()
            .map(|token| crypto::encrypt_str(key, aad.as_bytes(), token))
            .transpose()
            .map_err(|err| CredentialError::Storage(err.into()))?;

        Ok(SealedTokens {
            access,
            refresh,
            expires_at: tokens.expires_at,
        })
    }

    /// Decrypts a connection's tokens, updates its `last_used_at` and
    /// records the read under `oauth:{platform}`
    pub async fn open_tokens(
        &self,
        connection: &oauth_connection::Model,
        client: &ClientContext,
    ) -> Result<TokenSet, CredentialError> {
        let result = self.open_tokens_inner(connection).await;
        self.audit(
            connection.user_id,
            &token_service(&connection.platform_name),
            AuditOperation::Read,
            &result,
            client,
        );
        result
    }

    async fn open_tokens_inner(
        &self,
        connection: &oauth_connection::Model,
    ) -> Result<TokenSet, CredentialError> {
        let key = self.key()?;
        let aad = token_aad(connection.user_id, &connection.platform_name);

        let (Some(ciphertext), Some(iv)) = (
            connection.access_token_ciphertext.as_deref(),
            connection.access_token_iv.as_deref(),
        ) else {
            return Err(CredentialError::NotFoundOrInvalid);
        };

        let access_token = crypto::decrypt_str(key, aad.as_bytes(), ciphertext, iv).map_err(|_| {
            tracing::error!(
                connection_id = %connection.id,
                platform = %connection.platform_name,
                "Token decryption failed"
            );
            CredentialError::NotFoundOrInvalid
        })?;

        let refresh_token = match (
            connection.refresh_token_ciphertext.as_deref(),
            connection.refresh_token_iv.as_deref(),
        ) {
            (Some(ciphertext), Some(iv)) => Some(
                crypto::decrypt_str(key, aad.as_bytes(), ciphertext, iv)
                    .map_err(|_| CredentialError::NotFoundOrInvalid)?,
            ),
            _ => None,
        };

        if let Err(err) = self.connections.touch_last_used(connection.id).await {
            tracing::warn!(connection_id = %connection.id, error = %err, "Failed to update connection last_used_at");
        }

        Ok(TokenSet {
            access_token,
            refresh_token,
            expires_at: connection.token_expires_at,
            scopes: connection.scope_list(),
        })
    }

    /// Clears a connection's tokens and marks it `disconnected`; `Ok(false)`
    /// when no connection existed
    pub async fn delete_tokens(
        &self,
        user_id: Uuid,
        platform: &str,
        client: &ClientContext,
    ) -> Result<bool, CredentialError> {
        let result = self
            .connections
            .disconnect(user_id, platform)
            .await
            .map_err(CredentialError::from);

        self.audit(
            user_id,
            &token_service(platform),
            AuditOperation::Delete,
            &result,
            client,
        );
        result
    }

    /// Waits for in-flight audit writes to finish
    pub async fn flush_audit(&self) {
        self.audit_tasks.close();
        self.audit_tasks.wait().await;
        self.audit_tasks.reopen();
    }

    fn audit<T>(
        &self,
        user_id: Uuid,
        service: &str,
        operation: AuditOperation,
        result: &Result<T, CredentialError>,
        client: &ClientContext,
    ) {
        if let Err(err) = result {
            tracing::warn!(%user_id, service, operation = operation.as_str(), error = %err, "Credential operation failed");
        }

        let record = AuditRecord {
            user_id,
            service_name: service.to_string(),
            operation: operation.as_str().to_string(),
            success: result.is_ok(),
            error_message: result.as_ref().err().map(|err| err.to_string()),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        };
        let repository = self.audit.clone();

        self.audit_tasks.spawn(async move {
            if let Err(err) = repository.insert(record).await {
                counter!("credential_audit_failures_total").increment(1);
                tracing::warn!(error = %err, "Failed to write credential audit record");
            }
        });
    }
}

impl From<CredentialError> for ApiError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::Configuration(reason) => {
                tracing::error!(%reason, "Credential store misconfigured");
                configuration_error("Credential storage is not configured", MASTER_KEY_HINT)
            }
            CredentialError::NotFoundOrInvalid => ApiError::new(
                axum::http::StatusCode::BAD_REQUEST,
                "credential_error",
                "Credential not found or invalid",
            ),
            CredentialError::Storage(err) => {
                tracing::error!(error = ?err, "Credential storage failure");
                ApiError::new(
                    axum::http::StatusCode::BAD_REQUEST,
                    "credential_error",
                    "Credential not found or invalid",
                )
            }
        }
    }
}

fn secret_aad(user_id: Uuid, service: &str) -> String {
    format!("{user_id}|{service}")
}

/// Audit service name for a platform's OAuth tokens
pub fn token_service(platform: &str) -> String {
    format!("oauth:{platform}")
}

fn token_aad(user_id: Uuid, platform: &str) -> String {
    format!("{user_id}|oauth|{platform}")
}
