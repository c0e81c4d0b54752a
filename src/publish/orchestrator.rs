//! Runs one publisher end to end
//!
//! Preconditions are checked against the database before any network call:
//! a missing or non-`connected` connection fails with `not_connected` without
//! touching the platform.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::caption::build_caption;
use super::{PublishContext, PublishError, PublishRequest, PublishSuccess, Publisher, platform_failure};
use crate::config::AppConfig;
use crate::credentials::{ClientContext, CredentialStore};
use crate::models::oauth_connection::{self, ConnectionStatus};
use crate::platforms::{Platform, PlatformError, ProviderRegistry, TokenSet};
use crate::repositories::{ConnectionRepository, PublishedVideoRepository};
use crate::sink::PublishOutcome;

#[derive(Clone)]
pub struct PublishOrchestrator {
    config: Arc<AppConfig>,
    registry: Arc<ProviderRegistry>,
    connections: ConnectionRepository,
    credentials: CredentialStore,
    videos: PublishedVideoRepository,
}

impl PublishOrchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ProviderRegistry>,
        connections: ConnectionRepository,
        credentials: CredentialStore,
        videos: PublishedVideoRepository,
    ) -> Self {
        Self {
            config,
            registry,
            connections,
            credentials,
            videos,
        }
    }

    /// Publishes `request` for `user_id` through `publisher`
    pub async fn publish(
        &self,
        user_id: Uuid,
        publisher: &dyn Publisher,
        request: PublishRequest,
        client: &ClientContext,
        cancel: CancellationToken,
    ) -> Result<PublishSuccess, PublishError> {
        let platform = publisher.platform();
        let method = publisher.method();
        request.validate()?;

        let connection = self
            .connections
            .find_by_user_platform(user_id, platform.as_str())
            .await?
            .filter(oauth_connection::Model::is_connected)
            .ok_or_else(|| PublishError::NotConnected {
                platform: platform.to_string(),
            })?;

        publisher.check_connection(&connection)?;

        if let Some(video_id) = request.published_video_id
            && self.videos.find_for_user(video_id, user_id).await?.is_none()
        {
            return Err(PublishError::Validation(format!(
                "published video {video_id} not found"
            )));
        }

        let tokens = if publisher.needs_tokens() {
            let tokens = self.credentials.open_tokens(&connection, client).await?;
            Some(self.refresh_if_needed(&connection, tokens, client).await?)
        } else {
            None
        };

        let caption = build_caption(&request.caption, &request.hashtags, publisher.caption_limit());

        if let Some(video_id) = request.published_video_id {
            self.record(video_id, platform.as_str(), &PublishOutcome::Processing)
                .await;
        }

        counter!("publish_attempts_total", "platform" => method).increment(1);
        info!(%user_id, platform = method, published_video_id = ?request.published_video_id, "Publishing video");

        let result = publisher
            .publish(PublishContext {
                user_id,
                connection: &connection,
                tokens: tokens.as_ref(),
                request: &request,
                caption: &caption,
                client,
                cancel: &cancel,
            })
            .await;

        if let Err(PublishError::AuthRejected { details, .. }) = &result {
            warn!(%user_id, %platform, %details, "Platform rejected stored credentials");
            self.expire(&connection).await;
        }

        let outcome_label = match &result {
            Ok(_) => "published",
            Err(err) => err.code(),
        };
        counter!("publish_outcomes_total", "platform" => method, "outcome" => outcome_label)
            .increment(1);

        match &result {
            Ok(success) => {
                info!(
                    %user_id,
                    platform = method,
                    platform_video_id = %success.platform_video_id,
                    "Video published"
                );
                if let Some(video_id) = request.published_video_id {
                    self.record(
                        video_id,
                        platform.as_str(),
                        &PublishOutcome::Published {
                            platform_video_id: success.platform_video_id.clone(),
                            platform_url: success.platform_url.clone(),
                            published_at: Utc::now(),
                        },
                    )
                    .await;
                }
            }
            Err(err) => {
                warn!(%user_id, platform = method, code = err.code(), error = %err, "Publish failed");
                // Processing was recorded above, so every failure from here on
                // must leave the entry terminal
                if let Some(video_id) = request.published_video_id {
                    self.record_failure(video_id, platform.as_str(), &err.public_message())
                        .await;
                }
            }
        }

        result
    }

    /// Refreshes tokens close to expiry and persists them under the version guard.
    ///
    /// When another request refreshed first, the winner's tokens are used.
    async fn refresh_if_needed(
        &self,
        connection: &oauth_connection::Model,
        tokens: TokenSet,
        client: &ClientContext,
    ) -> Result<TokenSet, PublishError> {
        let lead = Duration::seconds(self.config.token_refresh_lead_seconds as i64);
        if !tokens.expires_within(lead) || tokens.refresh_token.is_none() {
            return Ok(tokens);
        }

        let platform: Platform = connection.platform_name.parse().map_err(|err: PlatformError| {
            PublishError::Internal(anyhow::anyhow!(err))
        })?;
        let provider = match self.registry.get(platform) {
            Ok(provider) if provider.supports_refresh() => provider,
            Ok(_) => return Ok(tokens),
            Err(err) => {
                warn!(%platform, error = %err, "Cannot refresh tokens for an unconfigured platform");
                return Ok(tokens);
            }
        };

        debug!(connection_id = %connection.id, %platform, "Refreshing tokens nearing expiry");
        let refreshed = match provider.refresh(&tokens).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                let err = match err {
                    PlatformError::Http { status, .. } if (400..500).contains(&status) => {
                        PublishError::AuthRejected {
                            platform: platform.to_string(),
                            details: err.to_string(),
                        }
                    }
                    other => platform_failure(other),
                };
                if matches!(err, PublishError::AuthRejected { .. }) {
                    warn!(connection_id = %connection.id, %platform, "Token refresh rejected");
                    self.expire(connection).await;
                }
                return Err(err);
            }
        };

        let sealed = self
            .credentials
            .seal_tokens(connection.user_id, &connection.platform_name, &refreshed, client)?;

        if self
            .connections
            .update_tokens_if_version(connection.id, connection.version, &sealed)
            .await?
        {
            info!(connection_id = %connection.id, %platform, "Stored refreshed tokens");
            return Ok(refreshed);
        }

        info!(connection_id = %connection.id, %platform, "Concurrent refresh won, using its tokens");
        let winner = self
            .connections
            .find_by_id(connection.id)
            .await?
            .filter(oauth_connection::Model::is_connected)
            .ok_or_else(|| PublishError::NotConnected {
                platform: platform.to_string(),
            })?;
        Ok(self.credentials.open_tokens(&winner, client).await?)
    }

    async fn expire(&self, connection: &oauth_connection::Model) {
        if let Err(err) = self
            .connections
            .set_status(connection.id, ConnectionStatus::Expired)
            .await
        {
            error!(connection_id = %connection.id, error = %err, "Failed to mark connection expired");
        }
    }

    async fn record(&self, video_id: Uuid, platform: &str, outcome: &PublishOutcome) {
        if let Err(err) = self.videos.record(video_id, platform, outcome).await {
            error!(published_video_id = %video_id, platform, error = %err, "Failed to record publish outcome");
        }
    }

    async fn record_failure(&self, video_id: Uuid, platform: &str, message: &str) {
        if let Err(err) = self.videos.record_failure(video_id, platform, message).await {
            error!(published_video_id = %video_id, platform, error = %err, "Failed to record publish failure");
        }
    }
}
