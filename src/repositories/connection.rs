//! Connection repository for database operations
//!
//! Encapsulates SeaORM operations on `oauth_connections`. Every write that
//! touches tokens is a conditional update on `version`, so a refresh racing a
//! reconnect can never overwrite the winner's tokens.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::credentials::SealedTokens;
use crate::error::is_unique_conflict;
use crate::models::oauth_connection::{self, ConnectionStatus, Entity as OAuthConnection};

const MAX_WRITE_ATTEMPTS: usize = 5;

/// Values written when a user (re)connects a platform
#[derive(Debug, Clone)]
pub struct ConnectionUpsert {
    pub user_id: Uuid,
    pub platform_name: String,
    /// `None` for connections that authenticate with a stored API key instead
    pub tokens: Option<SealedTokens>,
    pub platform_user_id: Option<String>,
    pub platform_username: Option<String>,
    pub scopes: Vec<String>,
    pub metadata: JsonValue,
}

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    db: Arc<DatabaseConnection>,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Finds the connection for a user/platform pair
    pub async fn find_by_user_platform(
        &self,
        user_id: Uuid,
        platform_name: &str,
    ) -> Result<Option<oauth_connection::Model>> {
        Ok(OAuthConnection::find()
            .filter(oauth_connection::Column::UserId.eq(user_id))
            .filter(oauth_connection::Column::PlatformName.eq(platform_name))
            .one(&*self.db)
            .await?)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<oauth_connection::Model>> {
        Ok(OAuthConnection::find_by_id(id).one(&*self.db).await?)
    }

    /// Lists all connections for a user ordered by platform name
    pub async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<oauth_connection::Model>> {
        Ok(OAuthConnection::find()
            .filter(oauth_connection::Column::UserId.eq(user_id))
            .order_by_asc(oauth_connection::Column::PlatformName)
            .all(&*self.db)
            .await?)
    }

    /// Inserts or replaces the connection for `(user_id, platform_name)`.
    ///
    /// The connection ends up `connected` with the supplied tokens. Concurrent
    /// writers are resolved by retrying on version conflicts and on
    /// unique-constraint races between two first inserts.
    pub async fn upsert_connection(
        &self,
        upsert: ConnectionUpsert,
    ) -> Result<oauth_connection::Model> {
        let scopes = JsonValue::from(upsert.scopes.clone());

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let now = Utc::now();
            let existing = self
                .find_by_user_platform(upsert.user_id, &upsert.platform_name)
                .await?;

            match existing {
                None => {
                    let id = Uuid::new_v4();
                    let active = oauth_connection::ActiveModel {
                        id: Set(id),
                        user_id: Set(upsert.user_id),
                        platform_name: Set(upsert.platform_name.clone()),
                        connection_status: Set(ConnectionStatus::Connected.as_str().to_string()),
                        platform_user_id: Set(upsert.platform_user_id.clone()),
                        platform_username: Set(upsert.platform_username.clone()),
                        scopes: Set(scopes.clone()),
                        connection_metadata: Set(upsert.metadata.clone()),
                        version: Set(1),
                        last_used_at: Set(None),
                        created_at: Set(now),
                        updated_at: Set(now),
                        ..token_columns(upsert.tokens.as_ref())
                    };

                    match OAuthConnection::insert(active)
                        .exec_without_returning(&*self.db)
                        .await
                    {
                        Ok(_) => return self.fetch(id).await,
                        Err(err) if is_unique_conflict(&err) => {
                            tracing::debug!(
                                user_id = %upsert.user_id,
                                platform = %upsert.platform_name,
                                attempt,
                                "Concurrent connection insert detected, retrying as update"
                            );
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Some(current) => {
                    let changes = oauth_connection::ActiveModel {
                        connection_status: Set(ConnectionStatus::Connected.as_str().to_string()),
                        platform_user_id: Set(upsert.platform_user_id.clone()),
                        platform_username: Set(upsert.platform_username.clone()),
                        scopes: Set(scopes.clone()),
                        connection_metadata: Set(upsert.metadata.clone()),
                        version: Set(current.version + 1),
                        updated_at: Set(now),
                        ..token_columns(upsert.tokens.as_ref())
                    };

                    if self
                        .update_if_version(current.id, current.version, changes)
                        .await?
                    {
                        return self.fetch(current.id).await;
                    }

                    tracing::debug!(
                        connection_id = %current.id,
                        attempt,
                        "Connection version conflict during upsert, retrying"
                    );
                }
            }
        }

        Err(anyhow!(
            "connection for platform '{}' kept changing concurrently",
            upsert.platform_name
        ))
    }

    /// Replaces the tokens only if the row still carries `expected_version`.
    ///
    /// Returns `false` when another writer won the race; the caller should
    /// re-read the connection and use the winner's tokens.
    pub async fn update_tokens_if_version(
        &self,
        id: Uuid,
        expected_version: i32,
        tokens: &SealedTokens,
    ) -> Result<bool> {
        let changes = oauth_connection::ActiveModel {
            version: Set(expected_version + 1),
            updated_at: Set(Utc::now()),
            ..token_columns(Some(tokens))
        };
        self.update_if_version(id, expected_version, changes).await
    }

    /// Sets the lifecycle status (e.g. `expired` after an auth rejection)
    pub async fn set_status(&self, id: Uuid, status: ConnectionStatus) -> Result<bool> {
        let current = self
            .find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let changes = oauth_connection::ActiveModel {
            connection_status: Set(status.as_str().to_string()),
            version: Set(current.version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        self.update_if_version(id, current.version, changes).await
    }

    /// Marks the connection `disconnected` and clears its tokens.
    ///
    /// Returns `false` when the user has no connection for the platform.
    pub async fn disconnect(&self, user_id: Uuid, platform_name: &str) -> Result<bool> {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(current) = self.find_by_user_platform(user_id, platform_name).await? else {
                return Ok(false);
            };

            let changes = oauth_connection::ActiveModel {
                connection_status: Set(ConnectionStatus::Disconnected.as_str().to_string()),
                access_token_ciphertext: Set(None),
                access_token_iv: Set(None),
                refresh_token_ciphertext: Set(None),
                refresh_token_iv: Set(None),
                token_expires_at: Set(None),
                version: Set(current.version + 1),
                updated_at: Set(Utc::now()),
                ..Default::default()
            };

            if self
                .update_if_version(current.id, current.version, changes)
                .await?
            {
                return Ok(true);
            }
        }

        Err(anyhow!(
            "connection for platform '{}' kept changing concurrently",
            platform_name
        ))
    }

    /// Records a token read; does not bump the version
    pub async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        OAuthConnection::update_many()
            .set(oauth_connection::ActiveModel {
                last_used_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(oauth_connection::Column::Id.eq(id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn update_if_version(
        &self,
        id: Uuid,
        expected_version: i32,
        changes: oauth_connection::ActiveModel,
    ) -> Result<bool> {
        let result = OAuthConnection::update_many()
            .set(changes)
            .filter(oauth_connection::Column::Id.eq(id))
            .filter(oauth_connection::Column::Version.eq(expected_version))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn fetch(&self, id: Uuid) -> Result<oauth_connection::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("connection not persisted"))
    }
}

fn token_columns(tokens: Option<&SealedTokens>) -> oauth_connection::ActiveModel {
    let access = tokens.map(|t| &t.access);
    let refresh = tokens.and_then(|t| t.refresh.as_ref());

    oauth_connection::ActiveModel {
        access_token_ciphertext: Set(access.map(|s| s.ciphertext.clone())),
        access_token_iv: Set(access.map(|s| s.iv.clone())),
        refresh_token_ciphertext: Set(refresh.map(|s| s.ciphertext.clone())),
        refresh_token_iv: Set(refresh.map(|s| s.iv.clone())),
        token_expires_at: Set(tokens.and_then(|t| t.expires_at)),
        ..Default::default()
    }
}
