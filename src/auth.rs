//! # Authentication
//!
//! Protected routes accept either a user session token (HS256 JWT whose `sub`
//! is the user id) or a configured service token accompanied by an
//! `X-User-Id` header naming the acting user. Both arrive as
//! `Authorization: Bearer <token>`.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, header::USER_AGENT, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::credentials::ClientContext;
use crate::error::{ApiError, configuration_error, unauthorized};
use crate::server::AppState;

/// Header naming the acting user on service-token requests
pub const USER_ID_HEADER: &str = "x-user-id";

/// How the caller authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Session,
    Service,
}

/// The authenticated user for the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub method: AuthMethod,
}

/// Claims carried by a user session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: usize,
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Authenticates the request and stores the [`AuthUser`] in its extensions
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = authenticate(&config, request.headers())?;
    tracing::debug!(user_id = %user.user_id, method = ?user.method, "Authenticated request");

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Resolves the caller from the `Authorization` (and `X-User-Id`) headers
pub fn authenticate(config: &AppConfig, headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let token = extract_bearer_token(headers)?;

    if is_service_token(config, token) {
        return service_user(headers);
    }

    let Some(secret) = config
        .session_jwt_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    else {
        // Only a JWT-shaped token implies the caller expected session auth
        if token.split('.').count() == 3 {
            return Err(configuration_error(
                "Session authentication is not configured",
                "set PUBLISHER_SESSION_JWT_SECRET",
            ));
        }
        return Err(unauthorized(Some("Invalid bearer token")));
    };

    let claims = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|err| {
        tracing::debug!(error = %err, "Rejected session token");
        unauthorized(Some("Invalid or expired session token"))
    })?
    .claims;

    let user_id = claims
        .sub
        .parse::<Uuid>()
        .map_err(|_| unauthorized(Some("Session token subject is not a user id")))?;

    Ok(AuthUser {
        user_id,
        method: AuthMethod::Session,
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn is_service_token(config: &AppConfig, token: &str) -> bool {
    config
        .service_tokens
        .iter()
        .filter(|configured| !configured.is_empty())
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into())
}

fn service_user(headers: &HeaderMap) -> Result<AuthUser, ApiError> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .ok_or_else(|| unauthorized(Some("Service tokens require an X-User-Id header")))?
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<Uuid>().ok())
        .ok_or_else(|| unauthorized(Some("X-User-Id must be a valid UUID")))?;

    Ok(AuthUser {
        user_id,
        method: AuthMethod::Service,
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| unauthorized(Some("Authentication required")))
    }
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(client_context(&parts.headers))
    }
}

/// Caller address and user agent for audit rows
pub fn client_context(headers: &HeaderMap) -> ClientContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let ip_address = header("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header("x-real-ip"))
        .map(str::to_string);

    ClientContext {
        ip_address,
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|agent| agent.chars().take(512).collect()),
    }
}
