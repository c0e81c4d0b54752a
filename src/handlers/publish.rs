//! # Publish Handlers
//!
//! One endpoint per publishing path. Each call runs to a terminal state
//! before responding; shutting the server down cancels in-flight polls.

use std::sync::Arc;

use axum::{
    extract::{State, rejection::JsonRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::credentials::ClientContext;
use crate::error::{ApiError, ErrorBody};
use crate::publish::{PublishRequest, Publisher};
use crate::server::AppState;

/// Successful publish response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PublishResponse {
    /// Always `true`
    pub success: bool,
    pub platform: String,
    pub platform_video_id: String,
    pub platform_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub message: String,
}

async fn run(
    state: &AppState,
    user: AuthUser,
    client: ClientContext,
    publisher: Arc<dyn Publisher>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let Json(request) = payload?;
    let success = state
        .orchestrator
        .publish(
            user.user_id,
            publisher.as_ref(),
            request,
            &client,
            state.shutdown.child_token(),
        )
        .await
        .map_err(|err| {
            ApiError::from(err).with_details(json!({ "method": publisher.method() }))
        })?;

    Ok(Json(PublishResponse {
        success: true,
        platform: publisher.platform().to_string(),
        platform_video_id: success.platform_video_id,
        platform_url: success.platform_url,
        status: success.status,
        message: success.message,
    }))
}

/// Publish a Reel to Instagram
///
/// Requires a connected Instagram Business or Creator account.
#[utoipa::path(
    post,
    path = "/publish/instagram",
    security(("bearer_auth" = [])),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Video published", body = PublishResponse),
        (status = 400, description = "Not connected, wrong account type, validation or platform rejection", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 500, description = "Processing timeout or platform unavailable", body = ErrorBody)
    ),
    tag = "publish"
)]
pub async fn publish_instagram(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let publisher = state.publishers.instagram.clone();
    run(&state, user, client, publisher, payload).await
}

/// Publish to TikTok through the Content Posting API
#[utoipa::path(
    post,
    path = "/publish/tiktok",
    security(("bearer_auth" = [])),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Video published", body = PublishResponse),
        (status = 400, description = "Not connected, wrong publish method, validation or platform rejection", body = ErrorBody),
        (status = 500, description = "Processing timeout or platform unavailable", body = ErrorBody)
    ),
    tag = "publish"
)]
pub async fn publish_tiktok(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let publisher = state.publishers.tiktok_direct.clone();
    run(&state, user, client, publisher, payload).await
}

/// Publish to TikTok through Blotato
#[utoipa::path(
    post,
    path = "/publish/tiktok/blotato",
    security(("bearer_auth" = [])),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Video published", body = PublishResponse),
        (status = 400, description = "Not connected, wrong publish method, validation or platform rejection", body = ErrorBody),
        (status = 500, description = "Processing timeout or platform unavailable", body = ErrorBody)
    ),
    tag = "publish"
)]
pub async fn publish_tiktok_blotato(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let publisher = state.publishers.tiktok_blotato.clone();
    run(&state, user, client, publisher, payload).await
}

/// Upload a video to YouTube
#[utoipa::path(
    post,
    path = "/publish/youtube",
    security(("bearer_auth" = [])),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Video uploaded", body = PublishResponse),
        (status = 400, description = "Not connected, validation or platform rejection", body = ErrorBody),
        (status = 500, description = "Platform unavailable", body = ErrorBody)
    ),
    tag = "publish"
)]
pub async fn publish_youtube(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, ApiError> {
    let publisher = state.publishers.youtube.clone();
    run(&state, user, client, publisher, payload).await
}
