//! TikTok publishing through the Blotato aggregator
//!
//! Authenticates with the user's stored Blotato API key rather than OAuth
//! tokens.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::caption::TIKTOK_CAPTION_LIMIT;
use super::poll::{Sleeper, poll_until_terminal};
use super::tiktok::{METHOD_BLOTATO, tiktok_privacy_level};
use super::{PublishContext, PublishError, PublishSuccess, Publisher, platform_failure, poll_result};
use crate::config::{AppConfig, PollBudgetConfig};
use crate::credentials::{CredentialError, CredentialStore};
use crate::models::oauth_connection;
use crate::platforms::{Platform, PlatformError, read_json};

/// User secret service name holding the Blotato API key
pub const BLOTATO_SERVICE: &str = "blotato";

const API_KEY_HEADER: &str = "blotato-api-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Submission {
    post_submission_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    public_url: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

pub struct TikTokBlotatoPublisher {
    client: reqwest::Client,
    api_base: String,
    credentials: CredentialStore,
    budget: PollBudgetConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl TikTokBlotatoPublisher {
    pub fn new(
        config: &AppConfig,
        client: reqwest::Client,
        credentials: CredentialStore,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            client,
            api_base: config.blotato_api_base.trim_end_matches('/').to_string(),
            credentials,
            budget: config.polling.blotato.clone(),
            sleeper,
        }
    }

    async fn post_status(
        &self,
        api_key: &str,
        submission_id: &str,
        attempt: u32,
    ) -> Result<Option<PostStatus>, PublishError> {
        let response = self
            .client
            .get(format!("{}/posts/{}", self.api_base, submission_id))
            .header(API_KEY_HEADER, api_key)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::TikTok, err)))?;
        let status: PostStatus = read_json(Platform::TikTok, response)
            .await
            .map_err(platform_failure)?;

        debug!(submission_id, attempt, status = %status.status, "Blotato post status");
        match status.status.as_str() {
            "published" => Ok(Some(status)),
            "failed" => Err(PublishError::UpstreamRejected {
                platform: Platform::TikTok.to_string(),
                message: status
                    .error_message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Blotato could not publish the video".to_string()),
            }),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Publisher for TikTokBlotatoPublisher {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn method(&self) -> &'static str {
        "tiktok_blotato"
    }

    fn caption_limit(&self) -> usize {
        TIKTOK_CAPTION_LIMIT
    }

    fn needs_tokens(&self) -> bool {
        false
    }

    fn check_connection(&self, connection: &oauth_connection::Model) -> Result<(), PublishError> {
        if connection.metadata_str("method") == Some(METHOD_BLOTATO) {
            Ok(())
        } else {
            Err(PublishError::WrongPublishMethod(
                "this TikTok connection uses the direct API; use /publish/tiktok".to_string(),
            ))
        }
    }

    async fn publish(&self, ctx: PublishContext<'_>) -> Result<PublishSuccess, PublishError> {
        let api_key = self
            .credentials
            .read_secret(ctx.user_id, BLOTATO_SERVICE, ctx.client)
            .await
            .map_err(|err| match err {
                CredentialError::NotFoundOrInvalid => PublishError::NotConnected {
                    platform: "blotato".to_string(),
                },
                other => other.into(),
            })?;

        let account_id = ctx
            .connection
            .metadata_str("blotato_account_id")
            .or(ctx.connection.platform_user_id.as_deref())
            .ok_or_else(|| PublishError::NotConnected {
                platform: "blotato".to_string(),
            })?;

        let response = self
            .client
            .post(format!("{}/posts", self.api_base))
            .header(API_KEY_HEADER, &api_key)
            .json(&json!({
                "post": {
                    "accountId": account_id,
                    "content": {
                        "text": ctx.caption,
                        "mediaUrls": [ctx.request.video_url.trim()],
                        "platform": "tiktok",
                    },
                    "target": {
                        "targetType": "tiktok",
                        "privacyLevel": tiktok_privacy_level(ctx.request.privacy()),
                        "disabledComments": false,
                        "disabledDuet": false,
                        "disabledStitch": false,
                        "isBrandedContent": false,
                        "isYourBrand": false,
                        "isAiGenerated": false,
                    }
                }
            }))
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::TikTok, err)))?;
        let submission: Submission = read_json(Platform::TikTok, response)
            .await
            .map_err(platform_failure)?;
        let submission_id = submission.post_submission_id;
        debug!(user_id = %ctx.user_id, submission_id, "Blotato post submitted");

        let outcome = poll_until_terminal(
            "blotato",
            &self.budget,
            self.sleeper.as_ref(),
            ctx.cancel,
            |attempt| self.post_status(&api_key, &submission_id, attempt),
        )
        .await?;
        let published = poll_result("tiktok", outcome)?;

        let platform_url = published.public_url.unwrap_or_else(|| {
            match ctx.connection.platform_username.as_deref() {
                Some(username) => format!("https://www.tiktok.com/@{username}"),
                None => "https://www.tiktok.com/".to_string(),
            }
        });

        Ok(PublishSuccess {
            platform_video_id: submission_id,
            platform_url,
            status: Some("published".to_string()),
            message: "Video published to TikTok via Blotato".to_string(),
        })
    }
}
