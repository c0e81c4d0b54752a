//! Published video repository
//!
//! Writes to the `platforms` map are partial: each call reads the row, merges
//! exactly one platform key and writes back conditionally on `version`. A
//! concurrent writer for another platform forces a re-read instead of being
//! clobbered.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::published_video::{self, Entity as PublishedVideo};
use crate::sink::{
    PlatformEntry, PlatformMap, PublishOutcome, derive_overall_status, platforms_from_json,
};

const MAX_MERGE_ATTEMPTS: usize = 10;

#[derive(Debug, Error)]
pub enum PublishedVideoError {
    #[error("published video {0} not found")]
    NotFound(Uuid),
}

/// Repository for `published_videos`
#[derive(Debug, Clone)]
pub struct PublishedVideoRepository {
    db: Arc<DatabaseConnection>,
}

impl PublishedVideoRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a record with a pending entry for each targeted platform
    pub async fn create(
        &self,
        user_id: Uuid,
        title: Option<String>,
        video_url: &str,
        platforms: &[String],
    ) -> Result<published_video::Model> {
        let now = Utc::now();
        let map: PlatformMap = platforms
            .iter()
            .map(|platform| (platform.clone(), PlatformEntry::pending(now)))
            .collect();
        let id = Uuid::new_v4();

        let active = published_video::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            title: Set(title),
            video_url: Set(video_url.to_string()),
            platforms: Set(serde_json::to_value(&map)?),
            overall_status: Set(derive_overall_status(&map).as_str().to_string()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        };

        PublishedVideo::insert(active)
            .exec_without_returning(&*self.db)
            .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("published video not persisted"))
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<published_video::Model>> {
        Ok(PublishedVideo::find_by_id(id).one(&*self.db).await?)
    }

    /// Finds a record owned by `user_id`
    pub async fn find_for_user(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<published_video::Model>> {
        Ok(PublishedVideo::find_by_id(id)
            .filter(published_video::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?)
    }

    /// Records one platform's outcome and recomputes the overall status
    pub async fn record(
        &self,
        id: Uuid,
        platform: &str,
        outcome: &PublishOutcome,
    ) -> Result<published_video::Model> {
        self.merge_entry(id, platform, |previous, now| outcome.merge_into(previous, now))
            .await
    }

    /// Records a failure, incrementing the platform's stored retry count
    pub async fn record_failure(
        &self,
        id: Uuid,
        platform: &str,
        error_message: &str,
    ) -> Result<published_video::Model> {
        self.merge_entry(id, platform, |previous, now| {
            let retry_count = previous.map(|entry| entry.retry_count).unwrap_or(0) + 1;
            PublishOutcome::Failed {
                error_message: error_message.to_string(),
                retry_count,
            }
            .merge_into(previous, now)
        })
        .await
    }

    async fn merge_entry<F>(
        &self,
        id: Uuid,
        platform: &str,
        merge: F,
    ) -> Result<published_video::Model>
    where
        F: Fn(Option<&PlatformEntry>, chrono::DateTime<Utc>) -> PlatformEntry,
    {
        for attempt in 1..=MAX_MERGE_ATTEMPTS {
            let current = self
                .find_by_id(id)
                .await?
                .ok_or(PublishedVideoError::NotFound(id))?;

            let now = Utc::now();
            let mut platforms = platforms_from_json(&current.platforms);
            let entry = merge(platforms.get(platform), now);
            platforms.insert(platform.to_string(), entry);
            let overall = derive_overall_status(&platforms);

            let result = PublishedVideo::update_many()
                .set(published_video::ActiveModel {
                    platforms: Set(serde_json::to_value(&platforms)?),
                    overall_status: Set(overall.as_str().to_string()),
                    version: Set(current.version + 1),
                    updated_at: Set(now),
                    ..Default::default()
                })
                .filter(published_video::Column::Id.eq(id))
                .filter(published_video::Column::Version.eq(current.version))
                .exec(&*self.db)
                .await?;

            if result.rows_affected == 1 {
                tracing::debug!(
                    published_video_id = %id,
                    platform,
                    overall_status = overall.as_str(),
                    "Recorded platform outcome"
                );
                return self
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| PublishedVideoError::NotFound(id).into());
            }

            tracing::debug!(
                published_video_id = %id,
                platform,
                attempt,
                "Published video version conflict, retrying merge"
            );
        }

        Err(anyhow!(
            "published video {} kept changing concurrently while recording {}",
            id,
            platform
        ))
    }
}
