//! User secret endpoints. Plaintext is accepted on write and never returned.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::credentials::{ClientContext, SecretStatus};
use crate::error::{ApiError, ErrorBody, not_found, validation_error};
use crate::server::AppState;

const MAX_SERVICE_LEN: usize = 64;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SaveSecretRequest {
    pub value: String,
}

fn validate_service(service: &str) -> Result<&str, ApiError> {
    let service = service.trim();
    let valid = !service.is_empty()
        && service.len() <= MAX_SERVICE_LEN
        && service
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(service)
    } else {
        Err(validation_error(
            "service must be 1-64 lowercase letters, digits, '-' or '_'",
        ))
    }
}

/// Store or replace a secret
#[utoipa::path(
    put,
    path = "/secrets/{service}",
    security(("bearer_auth" = [])),
    params(("service" = String, Path, description = "Service name, e.g. 'blotato'")),
    request_body = SaveSecretRequest,
    responses(
        (status = 200, description = "Secret stored", body = SecretStatus),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 503, description = "Credential storage not configured", body = ErrorBody)
    ),
    tag = "secrets"
)]
pub async fn put_secret(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    Path(service): Path<String>,
    payload: Result<Json<SaveSecretRequest>, JsonRejection>,
) -> Result<Json<SecretStatus>, ApiError> {
    let service = validate_service(&service)?;
    let Json(request) = payload?;
    if request.value.is_empty() {
        return Err(validation_error("value must not be empty"));
    }

    state
        .credentials
        .save_secret(user.user_id, service, &request.value, &client)
        .await?;
    Ok(Json(state.credentials.secret_status(user.user_id, service).await?))
}

/// Report whether a secret is stored
#[utoipa::path(
    get,
    path = "/secrets/{service}",
    security(("bearer_auth" = [])),
    params(("service" = String, Path, description = "Service name")),
    responses(
        (status = 200, description = "Secret status", body = SecretStatus)
    ),
    tag = "secrets"
)]
pub async fn get_secret_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(service): Path<String>,
) -> Result<Json<SecretStatus>, ApiError> {
    let service = validate_service(&service)?;
    Ok(Json(state.credentials.secret_status(user.user_id, service).await?))
}

/// Delete a secret
#[utoipa::path(
    delete,
    path = "/secrets/{service}",
    security(("bearer_auth" = [])),
    params(("service" = String, Path, description = "Service name")),
    responses(
        (status = 204, description = "Secret deleted"),
        (status = 404, description = "No secret stored", body = ErrorBody)
    ),
    tag = "secrets"
)]
pub async fn delete_secret(
    State(state): State<AppState>,
    user: AuthUser,
    client: ClientContext,
    Path(service): Path<String>,
) -> Result<StatusCode, ApiError> {
    let service = validate_service(&service)?;
    if state
        .credentials
        .delete_secret(user.user_id, service, &client)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found("No secret stored for this service"))
    }
}
