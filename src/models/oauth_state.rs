//! # OAuth State Model
//!
//! Server-held, expiring records backing the OAuth `state` parameter.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use uuid::Uuid;

/// OAuth State entity for storing OAuth flow state tokens
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth_states")]
pub struct Model {
    /// Primary key UUID
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// User that started the flow
    pub user_id: Uuid,

    /// Platform name (e.g., "instagram", "youtube")
    pub platform: String,

    /// State token generated for CSRF protection
    pub state: String,

    /// Redirect URI sent in the authorization request
    pub redirect_uri: Option<String>,

    /// Expiration timestamp
    pub expires_at: chrono::DateTime<chrono::Utc>,

    /// When the state was created
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// When the state was last updated
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
