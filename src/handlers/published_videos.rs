//! Published video records: create one before publishing, read it back to see
//! per-platform results and the derived overall status.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ErrorBody, not_found, validation_error};
use crate::models::published_video;
use crate::platforms::Platform;
use crate::server::AppState;
use crate::sink::{PlatformMap, platforms_from_json};

const PUBLISH_TARGETS: [Platform; 3] = [Platform::Instagram, Platform::TikTok, Platform::YouTube];

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePublishedVideoRequest {
    pub video_url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Platforms the video will be published to
    pub platforms: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublishedVideoResponse {
    pub id: Uuid,
    pub title: Option<String>,
    pub video_url: String,
    #[schema(value_type = Object)]
    pub platforms: PlatformMap,
    pub overall_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<published_video::Model> for PublishedVideoResponse {
    fn from(model: published_video::Model) -> Self {
        Self {
            platforms: platforms_from_json(&model.platforms),
            id: model.id,
            title: model.title,
            video_url: model.video_url,
            overall_status: model.overall_status,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

fn target_platforms(raw: &[String]) -> Result<Vec<String>, ApiError> {
    if raw.is_empty() {
        return Err(validation_error("platforms must name at least one platform"));
    }

    let mut platforms = Vec::with_capacity(raw.len());
    for name in raw {
        let platform: Platform = name.trim().parse()?;
        if !PUBLISH_TARGETS.contains(&platform) {
            return Err(validation_error(&format!(
                "{platform} is not a publishing target"
            )));
        }
        let name = platform.to_string();
        if !platforms.contains(&name) {
            platforms.push(name);
        }
    }
    Ok(platforms)
}

/// Create a published video record
#[utoipa::path(
    post,
    path = "/published-videos",
    security(("bearer_auth" = [])),
    request_body = CreatePublishedVideoRequest,
    responses(
        (status = 201, description = "Record created with pending platform entries", body = PublishedVideoResponse),
        (status = 400, description = "Invalid body", body = ErrorBody)
    ),
    tag = "published-videos"
)]
pub async fn create_published_video(
    State(state): State<AppState>,
    user: AuthUser,
    payload: Result<Json<CreatePublishedVideoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublishedVideoResponse>), ApiError> {
    let Json(request) = payload?;

    let video_url = url::Url::parse(request.video_url.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .ok_or_else(|| validation_error("video_url must be an absolute http(s) URL"))?;
    let platforms = target_platforms(&request.platforms)?;
    let title = request
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    let record = state
        .videos
        .create(user.user_id, title, video_url.as_str(), &platforms)
        .await?;

    tracing::info!(user_id = %user.user_id, published_video_id = %record.id, ?platforms, "Published video created");
    Ok((StatusCode::CREATED, Json(record.into())))
}

/// Fetch a published video record
#[utoipa::path(
    get,
    path = "/published-videos/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Published video id")),
    responses(
        (status = 200, description = "Published video", body = PublishedVideoResponse),
        (status = 404, description = "Not found", body = ErrorBody)
    ),
    tag = "published-videos"
)]
pub async fn get_published_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublishedVideoResponse>, ApiError> {
    let record = state
        .videos
        .find_for_user(id, user.user_id)
        .await?
        .ok_or_else(|| not_found("Published video not found"))?;
    Ok(Json(record.into()))
}
