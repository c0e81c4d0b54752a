//! Published video entity model
//!
//! Aggregates per-platform publish results for one content item. The
//! `platforms` column holds a JSON object keyed by platform name; see
//! [`crate::sink`] for the entry shape and the overall status derivation.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "published_videos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub title: Option<String>,

    pub video_url: String,

    /// Map of platform name to platform entry
    #[sea_orm(column_type = "JsonBinary")]
    pub platforms: JsonValue,

    /// Derived from `platforms`; never written independently
    pub overall_status: String,

    /// Optimistic concurrency version, bumped on every write
    pub version: i32,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
