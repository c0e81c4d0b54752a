//! TikTok Content Posting API, direct post with `PULL_FROM_URL`

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::caption::TIKTOK_CAPTION_LIMIT;
use super::poll::{Sleeper, poll_until_terminal};
use super::{
    Privacy, PublishContext, PublishError, PublishSuccess, Publisher, platform_failure, poll_result,
};
use crate::config::{AppConfig, PollBudgetConfig};
use crate::models::oauth_connection;
use crate::platforms::tiktok::{ApiStatus, METHOD_DIRECT};
use crate::platforms::{Platform, PlatformError, status_error};

/// Connection metadata tag for connections provisioned through Blotato
pub const METHOD_BLOTATO: &str = "blotato";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct InitData {
    publish_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
    #[serde(default, rename = "publicaly_available_post_id")]
    public_post_ids: Vec<serde_json::Value>,
}

/// Published post id, when TikTok exposes one
struct Completed {
    post_id: Option<String>,
}

pub fn tiktok_privacy_level(privacy: Privacy) -> &'static str {
    match privacy {
        Privacy::Public => "PUBLIC_TO_EVERYONE",
        Privacy::Friends => "MUTUAL_FOLLOW_FRIENDS",
        Privacy::Unlisted | Privacy::Private => "SELF_ONLY",
    }
}

fn unwrap_envelope<T>(envelope: Envelope<T>) -> Result<T, PublishError> {
    if let Some(status) = envelope.error.filter(|status| !status.is_ok()) {
        let platform = Platform::TikTok.to_string();
        return Err(match status.code.as_str() {
            "access_token_invalid" | "scope_not_authorized" => PublishError::AuthRejected {
                platform,
                details: status.message,
            },
            _ => PublishError::UpstreamRejected {
                platform,
                message: if status.message.is_empty() {
                    status.code
                } else {
                    status.message
                },
            },
        });
    }
    envelope.data.ok_or_else(|| {
        platform_failure(PlatformError::malformed(Platform::TikTok, "response without data"))
    })
}

pub struct TikTokDirectPublisher {
    client: reqwest::Client,
    api_base: String,
    budget: PollBudgetConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl TikTokDirectPublisher {
    pub fn new(config: &AppConfig, client: reqwest::Client, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            api_base: config.tiktok.api_base.trim_end_matches('/').to_string(),
            budget: config.polling.tiktok.clone(),
            sleeper,
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        body: serde_json::Value,
    ) -> Result<T, PublishError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::TikTok, err)))?;

        // Domain errors arrive as 4xx with the same envelope, so read it either way
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::TikTok, err)))?;
        match serde_json::from_str::<Envelope<T>>(&text) {
            Ok(envelope) if status.is_success() || envelope.error.is_some() => {
                unwrap_envelope(envelope)
            }
            _ => Err(platform_failure(status_error(
                Platform::TikTok,
                status.as_u16(),
                &text,
            ))),
        }
    }

    async fn publish_status(
        &self,
        token: &str,
        publish_id: &str,
        attempt: u32,
    ) -> Result<Option<Completed>, PublishError> {
        let data: StatusData = self
            .post(
                "/post/publish/status/fetch/",
                token,
                json!({ "publish_id": publish_id }),
            )
            .await?;

        debug!(publish_id, attempt, status = %data.status, "TikTok publish status");
        match data.status.as_str() {
            "PUBLISH_COMPLETE" => Ok(Some(Completed {
                post_id: data.public_post_ids.first().map(|id| match id {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            })),
            "FAILED" => Err(PublishError::UpstreamRejected {
                platform: Platform::TikTok.to_string(),
                message: data
                    .fail_reason
                    .filter(|r| !r.is_empty())
                    .map(|reason| format!("TikTok could not publish the video: {reason}"))
                    .unwrap_or_else(|| "TikTok could not publish the video".to_string()),
            }),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl Publisher for TikTokDirectPublisher {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn method(&self) -> &'static str {
        "tiktok"
    }

    fn caption_limit(&self) -> usize {
        TIKTOK_CAPTION_LIMIT
    }

    fn check_connection(&self, connection: &oauth_connection::Model) -> Result<(), PublishError> {
        match connection.metadata_str("method").unwrap_or(METHOD_DIRECT) {
            METHOD_DIRECT => Ok(()),
            METHOD_BLOTATO => Err(PublishError::WrongPublishMethod(
                "this TikTok connection publishes through Blotato; use /publish/tiktok/blotato"
                    .to_string(),
            )),
            other => Err(PublishError::WrongPublishMethod(format!(
                "unsupported TikTok connection method '{other}'"
            ))),
        }
    }

    async fn publish(&self, ctx: PublishContext<'_>) -> Result<PublishSuccess, PublishError> {
        let token = ctx.access_token()?;

        let init: InitData = self
            .post(
                "/post/publish/video/init/",
                token,
                json!({
                    "post_info": {
                        "title": ctx.caption,
                        "privacy_level": tiktok_privacy_level(ctx.request.privacy()),
                        "disable_comment": false,
                        "disable_duet": false,
                        "disable_stitch": false,
                    },
                    "source_info": {
                        "source": "PULL_FROM_URL",
                        "video_url": ctx.request.video_url.trim(),
                    }
                }),
            )
            .await?;
        let publish_id = init.publish_id;
        debug!(user_id = %ctx.user_id, publish_id, "TikTok upload initialized");

        let outcome = poll_until_terminal(
            "tiktok",
            &self.budget,
            self.sleeper.as_ref(),
            ctx.cancel,
            |attempt| self.publish_status(token, &publish_id, attempt),
        )
        .await?;
        let completed = poll_result("tiktok", outcome)?;

        let username = ctx.connection.platform_username.as_deref();
        let platform_url = match (username, completed.post_id.as_deref()) {
            (Some(user), Some(post_id)) => format!("https://www.tiktok.com/@{user}/video/{post_id}"),
            (Some(user), None) => format!("https://www.tiktok.com/@{user}"),
            (None, _) => "https://www.tiktok.com/".to_string(),
        };

        Ok(PublishSuccess {
            platform_video_id: completed.post_id.unwrap_or(publish_id),
            platform_url,
            status: Some("published".to_string()),
            message: "Video published to TikTok".to_string(),
        })
    }
}
