//! YouTube Data API resumable upload
//!
//! The video is downloaded from `video_url` within the configured size limit,
//! a resumable session is opened with the snippet/status metadata, and the
//! bytes are sent in one `PUT`.
//! There is no processing poll; the watch URL is returned as soon as the
//! upload is accepted.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::caption::{YOUTUBE_DESCRIPTION_LIMIT, normalize_hashtag, youtube_title};
use super::download::{DownloadedVideo, VideoDownloader};
use super::{Privacy, PublishContext, PublishError, PublishSuccess, Publisher, platform_failure};
use crate::config::AppConfig;
use crate::models::oauth_connection;
use crate::platforms::{Platform, PlatformError, read_json, status_error};

#[derive(Debug, Deserialize)]
struct UploadedVideo {
    id: String,
    #[serde(default)]
    status: Option<UploadStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadStatus {
    #[serde(default)]
    upload_status: Option<String>,
}

pub fn youtube_privacy_status(privacy: Privacy) -> &'static str {
    match privacy {
        Privacy::Public => "public",
        Privacy::Unlisted => "unlisted",
        Privacy::Friends | Privacy::Private => "private",
    }
}

pub struct YouTubePublisher {
    client: reqwest::Client,
    downloader: VideoDownloader,
    api_base: String,
}

impl YouTubePublisher {
    pub fn new(config: &AppConfig, client: reqwest::Client) -> Self {
        Self {
            client,
            downloader: VideoDownloader::new(config),
            api_base: config.youtube.api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn open_session(
        &self,
        token: &str,
        metadata: serde_json::Value,
        content_type: &str,
        content_length: usize,
    ) -> Result<String, PublishError> {
        let response = self
            .client
            .post(format!(
                "{}/upload/youtube/v3/videos?uploadType=resumable&part=snippet,status",
                self.api_base
            ))
            .bearer_auth(token)
            .header("X-Upload-Content-Type", content_type)
            .header("X-Upload-Content-Length", content_length)
            .json(&metadata)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::YouTube, err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(platform_failure(status_error(
                Platform::YouTube,
                status.as_u16(),
                &body,
            )));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                platform_failure(PlatformError::malformed(
                    Platform::YouTube,
                    "resumable session without a Location header",
                ))
            })
    }

    async fn upload(
        &self,
        token: &str,
        session_url: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedVideo, PublishError> {
        let response = self
            .client
            .put(session_url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| platform_failure(PlatformError::network(Platform::YouTube, err)))?;
        read_json(Platform::YouTube, response)
            .await
            .map_err(platform_failure)
    }
}

#[async_trait]
impl Publisher for YouTubePublisher {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn method(&self) -> &'static str {
        "youtube"
    }

    fn caption_limit(&self) -> usize {
        YOUTUBE_DESCRIPTION_LIMIT
    }

    fn check_connection(&self, _connection: &oauth_connection::Model) -> Result<(), PublishError> {
        Ok(())
    }

    async fn publish(&self, ctx: PublishContext<'_>) -> Result<PublishSuccess, PublishError> {
        let token = ctx.access_token()?;

        let DownloadedVideo {
            bytes,
            content_type,
        } = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(PublishError::Cancelled),
            downloaded = self.downloader.download(ctx.request.video_url.trim()) => downloaded?,
        };
        debug!(user_id = %ctx.user_id, size = bytes.len(), %content_type, "Downloaded video for YouTube");

        let tags: Vec<String> = ctx
            .request
            .hashtags
            .iter()
            .filter_map(|tag| normalize_hashtag(tag))
            .map(|tag| tag.trim_start_matches('#').to_string())
            .collect();
        let metadata = json!({
            "snippet": {
                "title": youtube_title(ctx.request.title.as_deref(), &ctx.request.caption),
                "description": ctx.caption,
                "tags": tags,
                "categoryId": "22",
            },
            "status": {
                "privacyStatus": youtube_privacy_status(ctx.request.privacy()),
                "selfDeclaredMadeForKids": false,
            }
        });

        let session_url = self
            .open_session(token, metadata, &content_type, bytes.len())
            .await?;

        let video = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(PublishError::Cancelled),
            uploaded = self.upload(token, &session_url, &content_type, bytes) => uploaded?,
        };

        let upload_status = video
            .status
            .and_then(|status| status.upload_status)
            .unwrap_or_else(|| "uploaded".to_string());
        if matches!(upload_status.as_str(), "failed" | "rejected") {
            return Err(PublishError::UpstreamRejected {
                platform: Platform::YouTube.to_string(),
                message: format!("YouTube {upload_status} the upload"),
            });
        }

        Ok(PublishSuccess {
            platform_url: format!("https://www.youtube.com/watch?v={}", video.id),
            platform_video_id: video.id,
            status: Some(upload_status),
            message: "Video uploaded to YouTube".to_string(),
        })
    }
}
