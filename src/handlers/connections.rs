//! # Connections API Handlers
//!
//! Listing and removing a user's platform connections, plus registering a
//! Blotato-backed TikTok connection.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use super::parse_platform;
use crate::auth::AuthUser;
use crate::credentials::ClientContext;
use crate::error::{ApiError, ErrorBody, not_found, validation_error};
use crate::models::oauth_connection::ConnectionSummary;
use crate::platforms::Platform;
use crate::publish::blotato::BLOTATO_SERVICE;
use crate::publish::tiktok::METHOD_BLOTATO;
use crate::repositories::ConnectionUpsert;
use crate::server::AppState;

/// Response for connection listing
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    pub connections: Vec<ConnectionSummary>,
}

/// Body of `POST /connections/tiktok/blotato`
#[derive(Debug, Deserialize, ToSchema)]
pub struct BlotatoConnectRequest {
    /// Blotato API key; stored encrypted, never returned
    pub api_key: String,
    /// Blotato account id of the TikTok account to post as
    pub account_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// List the caller's connections
#[utoipa::path(
    get,
    path = "/connections",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Connections for the authenticated user", body = ConnectionsResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let connections = state
        .connections
        .list_by_user(user.user_id)
        .await?
        .into_iter()
        .map(ConnectionSummary::from)
        .collect();

    Ok(Json(ConnectionsResponse { connections }))
}

/// Disconnect a platform
///
/// Clears stored tokens and marks the connection `disconnected`.
#[utoipa::path(
    delete,
    path = "/connections/{platform}",
    security(("bearer_auth" = [])),
    params(("platform" = String, Path, description = "Platform identifier")),
    responses(
        (status = 204, description = "Connection removed"),
        (status = 400, description = "Unsupported platform", body = ErrorBody),
        (status = 404, description = "No connection for this platform", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    Path(platform): Path<String>,
) -> Result<StatusCode, ApiError> {
    let platform = parse_platform(&platform)?;
    if !state
        .credentials
        .delete_tokens(user.user_id, platform.as_str(), &client)
        .await?
    {
        return Err(not_found(&format!("No {platform} connection found")));
    }

    tracing::info!(user_id = %user.user_id, %platform, "Platform disconnected");
    Ok(StatusCode::NO_CONTENT)
}

/// Connect TikTok through Blotato
///
/// Stores the Blotato API key as a user secret and records a TikTok
/// connection tagged `method=blotato`.
#[utoipa::path(
    post,
    path = "/connections/tiktok/blotato",
    security(("bearer_auth" = [])),
    request_body = BlotatoConnectRequest,
    responses(
        (status = 201, description = "Connection stored", body = ConnectionSummary),
        (status = 400, description = "Invalid body", body = ErrorBody),
        (status = 503, description = "Credential storage not configured", body = ErrorBody)
    ),
    tag = "connections"
)]
pub async fn connect_tiktok_blotato(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    payload: Result<Json<BlotatoConnectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ConnectionSummary>), ApiError> {
    let Json(request) = payload?;
    let api_key = request.api_key.trim();
    let account_id = request.account_id.trim();
    if api_key.is_empty() || account_id.is_empty() {
        return Err(validation_error("api_key and account_id are required"));
    }

    state
        .credentials
        .save_secret(user.user_id, BLOTATO_SERVICE, api_key, &client)
        .await?;

    let connection = state
        .connections
        .upsert_connection(ConnectionUpsert {
            user_id: user.user_id,
            platform_name: Platform::TikTok.to_string(),
            tokens: None,
            platform_user_id: Some(account_id.to_string()),
            platform_username: request.username.filter(|u| !u.trim().is_empty()),
            scopes: Vec::new(),
            metadata: json!({
                "method": METHOD_BLOTATO,
                "blotato_account_id": account_id,
            }),
        })
        .await?;

    tracing::info!(user_id = %user.user_id, connection_id = %connection.id, "TikTok connected through Blotato");
    Ok((StatusCode::CREATED, Json(ConnectionSummary::from(connection))))
}
