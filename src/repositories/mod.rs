//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! service's entities. Each holds a shared `Arc<DatabaseConnection>`.

pub mod connection;
pub mod oauth_state;
pub mod published_video;
pub mod user_secret;

pub use connection::{ConnectionRepository, ConnectionUpsert};
pub use oauth_state::OAuthStateRepository;
pub use published_video::PublishedVideoRepository;
pub use user_secret::{AuditRecord, CredentialAuditRepository, UserSecretRepository};
