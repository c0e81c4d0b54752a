//! OAuth connection entity model
//!
//! One row per (user, platform) holding the encrypted tokens and the
//! platform-side identity resolved during the OAuth exchange.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// OAuth connection between a user and a social platform
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "oauth_connections")]
pub struct Model {
    /// Unique identifier for the connection (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Platform name (e.g. "instagram", "tiktok")
    pub platform_name: String,

    /// AES-GCM ciphertext of the access token
    pub access_token_ciphertext: Option<Vec<u8>>,

    /// IV used for the access token ciphertext
    pub access_token_iv: Option<Vec<u8>>,

    /// AES-GCM ciphertext of the refresh token (not every platform issues one)
    pub refresh_token_ciphertext: Option<Vec<u8>>,

    /// IV used for the refresh token ciphertext
    pub refresh_token_iv: Option<Vec<u8>>,

    /// Access token expiry, when the platform reports one
    pub token_expires_at: Option<chrono::DateTime<chrono::Utc>>,

    /// connected | disconnected | error | expired
    pub connection_status: String,

    /// The platform's own account, channel or business account identifier
    pub platform_user_id: Option<String>,

    /// Display handle on the platform
    pub platform_username: Option<String>,

    /// Granted scopes (JSON array of strings)
    #[sea_orm(column_type = "JsonBinary")]
    pub scopes: JsonValue,

    /// Free-form platform metadata (channel title, business account id, method tag)
    #[sea_orm(column_type = "JsonBinary")]
    pub connection_metadata: JsonValue,

    /// Optimistic concurrency version, bumped on every write
    pub version: i32,

    /// Last time the tokens were read for a publish
    pub last_used_at: Option<chrono::DateTime<chrono::Utc>>,

    pub created_at: chrono::DateTime<chrono::Utc>,

    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Error,
    Expired,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(ConnectionStatus::Connected),
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            "error" => Ok(ConnectionStatus::Error),
            "expired" => Ok(ConnectionStatus::Expired),
            other => Err(format!("unknown connection status '{other}'")),
        }
    }
}

impl Model {
    pub fn status(&self) -> Option<ConnectionStatus> {
        self.connection_status.parse().ok()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == Some(ConnectionStatus::Connected)
    }

    /// Reads a string value from `connection_metadata`.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.connection_metadata.get(key).and_then(JsonValue::as_str)
    }

    pub fn scope_list(&self) -> Vec<String> {
        self.scopes
            .as_array()
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Connection summary returned by the API (never includes tokens)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionSummary {
    pub id: Uuid,
    pub platform: String,
    #[schema(value_type = String)]
    pub status: String,
    pub platform_user_id: Option<String>,
    pub platform_username: Option<String>,
    pub scopes: Vec<String>,
    #[schema(value_type = Object)]
    pub metadata: JsonValue,
    pub token_expires_at: Option<String>,
    pub last_used_at: Option<String>,
    pub updated_at: String,
}

impl From<Model> for ConnectionSummary {
    fn from(model: Model) -> Self {
        let scopes = model.scope_list();
        Self {
            id: model.id,
            platform: model.platform_name,
            status: model.connection_status,
            platform_user_id: model.platform_user_id,
            platform_username: model.platform_username,
            scopes,
            metadata: model.connection_metadata,
            token_expires_at: model.token_expires_at.map(|t| t.to_rfc3339()),
            last_used_at: model.last_used_at.map(|t| t.to_rfc3339()),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}
