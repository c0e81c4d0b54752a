//! # Data Models
//!
//! SeaORM entities for the publishing service plus small response types shared
//! by handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod credential_audit_log;
pub mod oauth_connection;
pub mod oauth_state;
pub mod published_video;
pub mod user_secret;

pub use credential_audit_log::Entity as CredentialAuditLog;
pub use oauth_connection::Entity as OAuthConnection;
pub use oauth_state::Entity as OAuthState;
pub use published_video::Entity as PublishedVideo;
pub use user_secret::Entity as UserSecret;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "publisher".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
