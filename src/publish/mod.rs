//! # Publish orchestration
//!
//! One [`Publisher`] per platform flavour drives a single upload to a terminal
//! state. [`PublishOrchestrator`] owns everything around it: connection
//! checks, token refresh, result bookkeeping and error classification.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::credentials::{ClientContext, CredentialError, CredentialStore};
use crate::error::{ApiError, configuration_error};
use crate::models::oauth_connection;
use crate::platforms::{Platform, PlatformError, TokenSet};

pub mod blotato;
pub mod caption;
pub mod download;
pub mod instagram;
pub mod orchestrator;
pub mod poll;
pub mod tiktok;
pub mod youtube;

pub use blotato::TikTokBlotatoPublisher;
pub use caption::build_caption;
pub use instagram::InstagramPublisher;
pub use orchestrator::PublishOrchestrator;
pub use poll::{PollOutcome, Sleeper, TokioSleeper, poll_until_terminal};
pub use tiktok::TikTokDirectPublisher;
pub use youtube::YouTubePublisher;

/// Audience for the published video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    #[default]
    Public,
    Unlisted,
    Friends,
    Private,
}

/// Body of every `POST /publish/...` call
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublishRequest {
    /// Publicly reachable http(s) URL of the video file
    pub video_url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub privacy: Option<Privacy>,
    /// YouTube title; defaults to the caption's first line
    #[serde(default)]
    pub title: Option<String>,
    /// Published video record to report the outcome to
    #[serde(default)]
    pub published_video_id: Option<Uuid>,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<(), PublishError> {
        let url = url::Url::parse(self.video_url.trim()).map_err(|_| {
            PublishError::Validation("video_url must be an absolute http(s) URL".to_string())
        })?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(PublishError::Validation(
                "video_url must be an absolute http(s) URL".to_string(),
            ));
        }
        Ok(())
    }

    pub fn privacy(&self) -> Privacy {
        self.privacy.unwrap_or_default()
    }
}

/// Terminal success of one publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSuccess {
    pub platform_video_id: String,
    pub platform_url: String,
    pub status: Option<String>,
    pub message: String,
}

/// Caller-facing publish failures
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{platform} is not connected")]
    NotConnected { platform: String },
    /// The platform rejected the stored credentials mid-publish
    #[error("{platform} rejected the stored credentials: {details}")]
    AuthRejected { platform: String, details: String },
    #[error("wrong account type: {0}")]
    WrongAccountType(String),
    #[error("wrong publish method: {0}")]
    WrongPublishMethod(String),
    #[error("{0}")]
    Validation(String),
    #[error("{platform} rejected the request: {message}")]
    UpstreamRejected { platform: String, message: String },
    #[error("{platform} is still processing after {attempts} checks")]
    ProcessingTimeout { platform: String, attempts: u32 },
    #[error("{platform} is unavailable: {details}")]
    UpstreamUnavailable { platform: String, details: String },
    #[error("publish cancelled")]
    Cancelled,
    #[error("{platform} is not configured: {details}")]
    Configuration { platform: String, details: String },
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl PublishError {
    pub fn code(&self) -> &'static str {
        match self {
            PublishError::NotConnected { .. } | PublishError::AuthRejected { .. } => "not_connected",
            PublishError::WrongAccountType(_) => "wrong_account_type",
            PublishError::WrongPublishMethod(_) => "wrong_publish_method",
            PublishError::Validation(_) => "validation_failed",
            PublishError::UpstreamRejected { .. } => "upstream_rejected",
            PublishError::ProcessingTimeout { .. } => "processing_timeout",
            PublishError::UpstreamUnavailable { .. } => "upstream_unavailable",
            PublishError::Cancelled => "cancelled",
            PublishError::Configuration { .. } => "configuration_error",
            PublishError::Credential(CredentialError::Configuration(_)) => "configuration_error",
            PublishError::Credential(_) => "credential_error",
            PublishError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PublishError::NotConnected { .. }
            | PublishError::AuthRejected { .. }
            | PublishError::WrongAccountType(_)
            | PublishError::WrongPublishMethod(_)
            | PublishError::Validation(_)
            | PublishError::UpstreamRejected { .. } => StatusCode::BAD_REQUEST,
            PublishError::ProcessingTimeout { .. }
            | PublishError::UpstreamUnavailable { .. }
            | PublishError::Cancelled
            | PublishError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PublishError::Configuration { .. }
            | PublishError::Credential(CredentialError::Configuration(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PublishError::Credential(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show the caller and to store on the published video
    pub fn public_message(&self) -> String {
        match self {
            PublishError::NotConnected { platform } | PublishError::AuthRejected { platform, .. } => {
                format!("{platform} is not connected; connect or reconnect your account")
            }
            PublishError::WrongAccountType(message) => format!("Wrong account type: {message}"),
            PublishError::WrongPublishMethod(message) => format!("Wrong publish method: {message}"),
            PublishError::Validation(message) => message.clone(),
            PublishError::UpstreamRejected { message, .. } => message.clone(),
            PublishError::ProcessingTimeout { platform, .. } => format!(
                "{platform} is still processing the video; it may still complete, try again later"
            ),
            PublishError::UpstreamUnavailable { platform, .. } => {
                format!("{platform} is temporarily unavailable; try again later")
            }
            PublishError::Cancelled => "Publishing was cancelled".to_string(),
            PublishError::Configuration { platform, .. } => {
                format!("{platform} publishing is not configured")
            }
            PublishError::Credential(CredentialError::Configuration(_)) => {
                "Credential storage is not configured".to_string()
            }
            PublishError::Credential(_) => "Credential not found or invalid".to_string(),
            PublishError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::Credential(err) => err.into(),
            PublishError::Configuration { ref details, .. } => {
                configuration_error(&error.public_message(), details)
            }
            other => {
                if let PublishError::Internal(err) = &other {
                    tracing::error!(error = ?err, "Publish failed with an internal error");
                }
                ApiError::new(other.status(), other.code(), other.public_message())
            }
        }
    }
}

/// Maps a platform transport/API failure into the publish taxonomy
pub fn platform_failure(error: PlatformError) -> PublishError {
    match error {
        PlatformError::Unauthorized { platform, details } => {
            PublishError::AuthRejected { platform, details }
        }
        PlatformError::Http {
            platform,
            status,
            message,
        } if (400..500).contains(&status) => PublishError::UpstreamRejected { platform, message },
        PlatformError::Domain { platform, message } => {
            PublishError::UpstreamRejected { platform, message }
        }
        PlatformError::Configuration { platform, details } => {
            PublishError::Configuration { platform, details }
        }
        err @ (PlatformError::Http { .. }
        | PlatformError::Network { .. }
        | PlatformError::MalformedResponse { .. }) => PublishError::UpstreamUnavailable {
            platform: platform_name(&err),
            details: err.to_string(),
        },
        other => PublishError::Internal(anyhow::anyhow!(other)),
    }
}

fn platform_name(error: &PlatformError) -> String {
    match error {
        PlatformError::Http { platform, .. }
        | PlatformError::Network { platform, .. }
        | PlatformError::MalformedResponse { platform, .. } => platform.clone(),
        _ => String::new(),
    }
}

/// Maps a finished poll loop to the terminal value or a failure
pub fn poll_result<T>(platform: &str, outcome: PollOutcome<T>) -> Result<T, PublishError> {
    match outcome {
        PollOutcome::Terminal(value) => Ok(value),
        PollOutcome::TimedOut { attempts } => Err(PublishError::ProcessingTimeout {
            platform: platform.to_string(),
            attempts,
        }),
        PollOutcome::Cancelled { .. } => Err(PublishError::Cancelled),
    }
}

/// Everything a publisher needs for one attempt
pub struct PublishContext<'a> {
    pub user_id: Uuid,
    pub connection: &'a oauth_connection::Model,
    /// Decrypted OAuth tokens; `None` for API-key based publishers
    pub tokens: Option<&'a TokenSet>,
    pub request: &'a PublishRequest,
    /// Final caption, already truncated to the publisher's limit
    pub caption: &'a str,
    pub client: &'a ClientContext,
    pub cancel: &'a CancellationToken,
}

impl<'a> PublishContext<'a> {
    pub fn access_token(&self) -> Result<&'a str, PublishError> {
        self.tokens
            .map(|tokens| tokens.access_token.as_str())
            .ok_or_else(|| PublishError::Internal(anyhow::anyhow!("publisher requires OAuth tokens")))
    }
}

/// A single platform publishing path
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Platform whose connection this publisher uses
    fn platform(&self) -> Platform;

    /// Short label for logs and metrics
    fn method(&self) -> &'static str;

    fn caption_limit(&self) -> usize;

    /// Whether the connection's OAuth tokens must be opened
    fn needs_tokens(&self) -> bool {
        true
    }

    /// Rejects connections unsuitable for this publisher
    fn check_connection(&self, connection: &oauth_connection::Model) -> Result<(), PublishError>;

    async fn publish(&self, ctx: PublishContext<'_>) -> Result<PublishSuccess, PublishError>;
}

/// The publishers served by the HTTP API
#[derive(Clone)]
pub struct PublisherSet {
    pub instagram: Arc<dyn Publisher>,
    pub tiktok_direct: Arc<dyn Publisher>,
    pub tiktok_blotato: Arc<dyn Publisher>,
    pub youtube: Arc<dyn Publisher>,
}

impl PublisherSet {
    pub fn from_config(
        config: &AppConfig,
        client: reqwest::Client,
        credentials: CredentialStore,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            instagram: Arc::new(InstagramPublisher::new(config, client.clone(), sleeper.clone())),
            tiktok_direct: Arc::new(TikTokDirectPublisher::new(
                config,
                client.clone(),
                sleeper.clone(),
            )),
            tiktok_blotato: Arc::new(TikTokBlotatoPublisher::new(
                config,
                client.clone(),
                credentials,
                sleeper,
            )),
            youtube: Arc::new(YouTubePublisher::new(config, client)),
        }
    }
}
