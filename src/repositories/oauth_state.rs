//! # OAuth State Repository
//!
//! Database operations for the server-held OAuth `state` records.

use chrono::{Duration, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::oauth_state::{self, ActiveModel, Entity, Model};

/// Repository for OAuth state database operations
#[derive(Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    /// Create a new OAuth state repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new OAuth state record
    pub async fn create(
        &self,
        user_id: Uuid,
        platform: &str,
        state: &str,
        redirect_uri: Option<String>,
        expires_in_minutes: i64,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let model = Model {
            id: Uuid::new_v4(),
            user_id,
            platform: platform.to_string(),
            state: state.to_string(),
            redirect_uri,
            expires_at: now + Duration::minutes(expires_in_minutes),
            created_at: now,
            updated_at: now,
        };

        let active = ActiveModel {
            id: Set(model.id),
            user_id: Set(model.user_id),
            platform: Set(model.platform.clone()),
            state: Set(model.state.clone()),
            redirect_uri: Set(model.redirect_uri.clone()),
            expires_at: Set(model.expires_at),
            created_at: Set(model.created_at),
            updated_at: Set(model.updated_at),
        };

        // Insert without RETURNING to avoid UnpackInsertId on SQLite UUID keys
        Entity::insert(active)
            .exec_without_returning(&*self.db)
            .await?;

        Ok(model)
    }

    /// Find an unexpired OAuth state by platform and state token
    pub async fn find_valid(
        &self,
        platform: &str,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(oauth_state::Column::Platform.eq(platform))
            .filter(oauth_state::Column::State.eq(state))
            .filter(oauth_state::Column::ExpiresAt.gt(Utc::now()))
            .one(&*self.db)
            .await
    }

    /// Find and consume an unexpired OAuth state.
    ///
    /// Returns `None` when the state is unknown, expired, or was consumed by a
    /// concurrent callback first.
    pub async fn consume(
        &self,
        platform: &str,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        let Some(found) = self.find_valid(platform, state).await? else {
            return Ok(None);
        };

        if self.delete_by_id(found.id).await? {
            Ok(Some(found))
        } else {
            Ok(None)
        }
    }

    /// Clean up expired OAuth states
    pub async fn cleanup_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lt(Utc::now()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }

    /// Delete a specific OAuth state by ID
    pub async fn delete_by_id(&self, id: Uuid) -> Result<bool, sea_orm::DbErr> {
        let result = Entity::delete_by_id(id).exec(&*self.db).await?;
        Ok(result.rows_affected > 0)
    }

    /// Count active OAuth states for a user
    pub async fn count_active_for_user(&self, user_id: Uuid) -> Result<u64, sea_orm::DbErr> {
        Entity::find()
            .filter(oauth_state::Column::UserId.eq(user_id))
            .filter(oauth_state::Column::ExpiresAt.gt(Utc::now()))
            .count(&*self.db)
            .await
    }
}
