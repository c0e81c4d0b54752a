//! Instagram Reels publishing through the Graph API
//!
//! container → poll `status_code` → `media_publish` → permalink

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::caption::INSTAGRAM_CAPTION_LIMIT;
use super::poll::{Sleeper, poll_until_terminal};
use super::{PublishContext, PublishError, PublishSuccess, Publisher, platform_failure, poll_result};
use crate::config::{AppConfig, PollBudgetConfig};
use crate::models::oauth_connection;
use crate::platforms::instagram::appsecret_proof;
use crate::platforms::{Platform, PlatformError, read_json};

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    status_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    #[serde(default)]
    permalink: Option<String>,
}

pub struct InstagramPublisher {
    client: reqwest::Client,
    api_base: String,
    app_secret: Option<String>,
    budget: PollBudgetConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl InstagramPublisher {
    pub fn new(config: &AppConfig, client: reqwest::Client, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            api_base: config.instagram.api_base.trim_end_matches('/').to_string(),
            app_secret: config.instagram.client_secret.clone().filter(|s| !s.is_empty()),
            budget: config.polling.instagram.clone(),
            sleeper,
        }
    }

    fn auth_params(&self, token: &str) -> Result<Vec<(&'static str, String)>, PublishError> {
        let mut params = vec![("access_token", token.to_string())];
        if let Some(secret) = &self.app_secret {
            params.push((
                "appsecret_proof",
                appsecret_proof(secret, token).map_err(platform_failure)?,
            ));
        }
        Ok(params)
    }

    async fn create_container(
        &self,
        account_id: &str,
        token: &str,
        video_url: &str,
        caption: &str,
    ) -> Result<String, PublishError> {
        let mut form = self.auth_params(token)?;
        form.push(("media_type", "REELS".to_string()));
        form.push(("video_url", video_url.to_string()));
        form.push(("caption", caption.to_string()));

        let response = self
            .client
            .post(format!("{}/{}/media", self.api_base, account_id))
            .form(&form)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::Instagram, err)))?;
        let container: IdResponse = read_json(Platform::Instagram, response)
            .await
            .map_err(platform_failure)?;
        Ok(container.id)
    }

    /// `Some(())` once the container is ready; errors when processing failed
    async fn container_ready(
        &self,
        container_id: &str,
        token: &str,
        attempt: u32,
    ) -> Result<Option<()>, PublishError> {
        let mut query = self.auth_params(token)?;
        query.push(("fields", "status_code,status".to_string()));

        let response = self
            .client
            .get(format!("{}/{}", self.api_base, container_id))
            .query(&query)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::Instagram, err)))?;
        let status: ContainerStatus = read_json(Platform::Instagram, response)
            .await
            .map_err(platform_failure)?;

        let code = status.status_code.as_deref().unwrap_or("IN_PROGRESS");
        debug!(container_id, attempt, status_code = code, "Instagram container status");

        match code {
            "FINISHED" | "PUBLISHED" => Ok(Some(())),
            "ERROR" | "EXPIRED" => Err(PublishError::UpstreamRejected {
                platform: Platform::Instagram.to_string(),
                message: status
                    .status
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "Instagram could not process the video".to_string()),
            }),
            _ => Ok(None),
        }
    }

    async fn publish_container(
        &self,
        account_id: &str,
        token: &str,
        container_id: &str,
    ) -> Result<String, PublishError> {
        let mut form = self.auth_params(token)?;
        form.push(("creation_id", container_id.to_string()));

        let response = self
            .client
            .post(format!("{}/{}/media_publish", self.api_base, account_id))
            .form(&form)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::Instagram, err)))?;
        let media: IdResponse = read_json(Platform::Instagram, response)
            .await
            .map_err(platform_failure)?;
        Ok(media.id)
    }

    async fn permalink(&self, media_id: &str, token: &str) -> Result<Option<String>, PublishError> {
        let mut query = self.auth_params(token)?;
        query.push(("fields", "permalink".to_string()));

        let response = self
            .client
            .get(format!("{}/{}", self.api_base, media_id))
            .query(&query)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::Instagram, err)))?;
        let body: Permalink = read_json(Platform::Instagram, response)
            .await
            .map_err(platform_failure)?;
        Ok(body.permalink)
    }
}

#[async_trait]
impl Publisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn method(&self) -> &'static str {
        "instagram"
    }

    fn caption_limit(&self) -> usize {
        INSTAGRAM_CAPTION_LIMIT
    }

    fn check_connection(&self, connection: &oauth_connection::Model) -> Result<(), PublishError> {
        if connection.metadata_str("account_type") != Some("business") {
            return Err(PublishError::WrongAccountType(
                "Instagram publishing requires a Business or Creator account".to_string(),
            ));
        }
        if connection
            .metadata_str("instagram_business_account_id")
            .is_none()
        {
            return Err(PublishError::WrongAccountType(
                "no Instagram business account is linked to this connection; reconnect".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(&self, ctx: PublishContext<'_>) -> Result<PublishSuccess, PublishError> {
        let token = ctx.access_token()?;
        let account_id = ctx
            .connection
            .metadata_str("instagram_business_account_id")
            .ok_or_else(|| {
                PublishError::WrongAccountType("missing Instagram business account".to_string())
            })?;

        let container_id = self
            .create_container(account_id, token, ctx.request.video_url.trim(), ctx.caption)
            .await?;
        debug!(user_id = %ctx.user_id, container_id, "Instagram media container created");

        let outcome = poll_until_terminal(
            "instagram",
            &self.budget,
            self.sleeper.as_ref(),
            ctx.cancel,
            |attempt| self.container_ready(&container_id, token, attempt),
        )
        .await?;
        poll_result("instagram", outcome)?;

        let media_id = self.publish_container(account_id, token, &container_id).await?;

        let platform_url = match self.permalink(&media_id, token).await {
            Ok(Some(permalink)) => permalink,
            Ok(None) | Err(_) => {
                warn!(media_id, "Instagram permalink unavailable, using profile URL");
                match ctx.connection.platform_username.as_deref() {
                    Some(username) => format!("https://www.instagram.com/{username}/"),
                    None => "https://www.instagram.com/".to_string(),
                }
            }
        };

        Ok(PublishSuccess {
            platform_video_id: media_id,
            platform_url,
            status: Some("published".to_string()),
            message: "Video published to Instagram".to_string(),
        })
    }
}
