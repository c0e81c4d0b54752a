//! # OAuth Handlers
//!
//! Start and callback endpoints for platform connections. The callback is
//! unauthenticated; the one-time `state` binds it to the user who started the
//! flow.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header::LOCATION},
    response::{IntoResponse, Json, Response},
};

use super::parse_platform;
use crate::auth::AuthUser;
use crate::credentials::ClientContext;
use crate::error::{ApiError, ErrorBody};
use crate::models::oauth_connection::ConnectionSummary;
use crate::oauth::{AuthorizationStart, CallbackParams};
use crate::server::AppState;

/// Start the OAuth flow for a platform
///
/// Returns the platform's authorization URL carrying a fresh one-time `state`.
#[utoipa::path(
    post,
    path = "/oauth/{platform}/start",
    security(("bearer_auth" = [])),
    params(
        ("platform" = String, Path, description = "Platform identifier, e.g. 'instagram'")
    ),
    responses(
        (status = 200, description = "Authorization URL generated", body = AuthorizationStart),
        (status = 400, description = "Unsupported platform", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials", body = ErrorBody),
        (status = 503, description = "Platform not configured", body = ErrorBody)
    ),
    tag = "oauth"
)]
pub async fn start_oauth(
    State(state): State<AppState>,
    user: AuthUser,
    Path(platform): Path<String>,
) -> Result<Json<AuthorizationStart>, ApiError> {
    let platform = parse_platform(&platform)?;
    let start = state.oauth.start(user.user_id, platform).await?;
    Ok(Json(start))
}

/// OAuth callback
///
/// Exchanges the code, resolves the platform identity and stores the
/// connection. When a dashboard redirect is configured the browser is sent
/// there with `platform`, `status` and (on failure) `error` query parameters.
#[utoipa::path(
    get,
    path = "/oauth/{platform}/callback",
    params(
        ("platform" = String, Path, description = "Platform identifier"),
        CallbackParams
    ),
    responses(
        (status = 200, description = "Connection stored", body = ConnectionSummary),
        (status = 303, description = "Redirect to the dashboard"),
        (status = 400, description = "Denied, invalid state or ineligible account", body = ErrorBody),
        (status = 500, description = "Platform unavailable", body = ErrorBody),
        (status = 503, description = "Platform not configured", body = ErrorBody)
    ),
    tag = "oauth"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    client: ClientContext,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let platform = match parse_platform(&platform) {
        Ok(platform) => platform,
        Err(err) => return err.into_response(),
    };

    let result = state
        .oauth
        .complete(platform, params, &client)
        .await
        .map_err(ApiError::from);

    let Some(dashboard) = state.config.dashboard_redirect_url.as_deref() else {
        return match result {
            Ok(connection) => Json(ConnectionSummary::from(connection)).into_response(),
            Err(err) => err.into_response(),
        };
    };

    let outcome = match &result {
        Ok(_) => vec![("platform", platform.as_str()), ("status", "connected")],
        Err(err) => vec![
            ("platform", platform.as_str()),
            ("status", "error"),
            ("error", &*err.code),
        ],
    };

    match url::Url::parse_with_params(dashboard, &outcome) {
        Ok(location) => (StatusCode::SEE_OTHER, [(LOCATION, location.to_string())]).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Invalid dashboard redirect URL");
            match result {
                Ok(connection) => Json(ConnectionSummary::from(connection)).into_response(),
                Err(err) => err.into_response(),
            }
        }
    }
}
