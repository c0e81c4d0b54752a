//! # OAuth connection flow
//!
//! `start` issues a one-time `state` bound to the user and platform.
//! `complete` consumes that state before any network call, then runs
//! exchange → identity → optional long-lived upgrade → seal → upsert.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use metrics::counter;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::credentials::{ClientContext, CredentialError, CredentialStore};
use crate::error::ApiError;
use crate::models::oauth_connection;
use crate::platforms::{Platform, PlatformError, ProviderRegistry};
use crate::repositories::{ConnectionRepository, ConnectionUpsert, OAuthStateRepository};

/// Query parameters delivered to the OAuth callback
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_reason: Option<String>,
    pub error_description: Option<String>,
}

/// Authorization URL handed back to the client
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationStart {
    pub authorize_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum OAuthFlowError {
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("missing '{0}' parameter")]
    MissingParameter(&'static str),
    #[error("OAuth state is invalid or expired")]
    InvalidState,
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("connection storage failed: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<sea_orm::DbErr> for OAuthFlowError {
    fn from(error: sea_orm::DbErr) -> Self {
        OAuthFlowError::Storage(error.into())
    }
}

impl OAuthFlowError {
    fn outcome(&self) -> &'static str {
        match self {
            OAuthFlowError::Denied(_) => "denied",
            OAuthFlowError::MissingParameter(_) | OAuthFlowError::InvalidState => "invalid_request",
            OAuthFlowError::Platform(PlatformError::Domain { .. }) => "not_eligible",
            OAuthFlowError::Platform(PlatformError::Configuration { .. }) => "not_configured",
            OAuthFlowError::Platform(_) => "upstream_error",
            OAuthFlowError::Credential(_) | OAuthFlowError::Storage(_) => "storage_error",
        }
    }
}

impl From<OAuthFlowError> for ApiError {
    fn from(error: OAuthFlowError) -> Self {
        match error {
            OAuthFlowError::Denied(reason) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "authorization_denied",
                format!("Authorization was denied: {reason}"),
            ),
            OAuthFlowError::MissingParameter(name) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "validation_failed",
                format!("Missing '{name}' parameter"),
            ),
            OAuthFlowError::InvalidState => ApiError::new(
                StatusCode::BAD_REQUEST,
                "invalid_state",
                "OAuth state is invalid or expired; start the connection again",
            ),
            OAuthFlowError::Platform(err) => err.into(),
            OAuthFlowError::Credential(err) => err.into(),
            OAuthFlowError::Storage(err) => err.into(),
        }
    }
}

/// Drives the authorization-code flow for every registered platform
#[derive(Clone)]
pub struct OAuthFlow {
    config: Arc<AppConfig>,
    registry: Arc<ProviderRegistry>,
    states: OAuthStateRepository,
    connections: ConnectionRepository,
    credentials: CredentialStore,
}

impl OAuthFlow {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<ProviderRegistry>,
        states: OAuthStateRepository,
        connections: ConnectionRepository,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            config,
            registry,
            states,
            connections,
            credentials,
        }
    }

    /// Issues a state for `user_id` and returns the platform's authorize URL
    pub async fn start(
        &self,
        user_id: Uuid,
        platform: Platform,
    ) -> Result<AuthorizationStart, OAuthFlowError> {
        let provider = self.registry.get(platform)?;
        let state = generate_state();
        let redirect_uri = self.config.redirect_uri(platform.as_str());
        let authorize_url = provider.authorize_url(&state, &redirect_uri)?;

        let record = self
            .states
            .create(
                user_id,
                platform.as_str(),
                &state,
                Some(redirect_uri),
                self.config.oauth_state_ttl_minutes,
            )
            .await?;

        info!(%user_id, %platform, state_id = %record.id, "OAuth flow started");
        Ok(AuthorizationStart {
            authorize_url: authorize_url.to_string(),
            expires_at: record.expires_at,
        })
    }

    /// Completes a callback and returns the stored connection
    pub async fn complete(
        &self,
        platform: Platform,
        params: CallbackParams,
        client: &ClientContext,
    ) -> Result<oauth_connection::Model, OAuthFlowError> {
        let result = self.run_callback(platform, params, client).await;

        let outcome = match &result {
            Ok(_) => "connected",
            Err(err) => err.outcome(),
        };
        counter!(
            "oauth_exchanges_total",
            "platform" => platform.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        if let Err(err) = &result {
            warn!(%platform, outcome, error = %err, "OAuth callback failed");
        }
        result
    }

    async fn run_callback(
        &self,
        platform: Platform,
        params: CallbackParams,
        client: &ClientContext,
    ) -> Result<oauth_connection::Model, OAuthFlowError> {
        if let Some(error) = params.error.filter(|e| !e.is_empty()) {
            if let Some(state) = params.state.as_deref() {
                // Burn the state so the callback cannot be replayed
                if let Err(err) = self.states.consume(platform.as_str(), state).await {
                    warn!(%platform, error = %err, "Failed to consume state after denied authorization");
                }
            }
            let reason = params
                .error_description
                .or(params.error_reason)
                .unwrap_or(error);
            return Err(OAuthFlowError::Denied(reason));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(OAuthFlowError::MissingParameter("code"))?;
        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(OAuthFlowError::MissingParameter("state"))?;

        let provider = self.registry.get(platform)?;

        let record = self
            .states
            .consume(platform.as_str(), &state)
            .await?
            .ok_or(OAuthFlowError::InvalidState)?;
        let user_id = record.user_id;
        let redirect_uri = record
            .redirect_uri
            .unwrap_or_else(|| self.config.redirect_uri(platform.as_str()));

        let tokens = provider.exchange_token(&code, &redirect_uri).await?;
        let identity = provider.fetch_profile(&tokens).await?;
        let tokens = provider.extend_token(tokens).await?;

        let sealed = self
            .credentials
            .seal_tokens(user_id, platform.as_str(), &tokens, client)?;

        let connection = self
            .connections
            .upsert_connection(ConnectionUpsert {
                user_id,
                platform_name: platform.to_string(),
                tokens: Some(sealed),
                platform_user_id: Some(identity.profile.id.clone()),
                platform_username: identity
                    .profile
                    .username
                    .clone()
                    .or_else(|| identity.profile.name.clone()),
                scopes: tokens.scopes.clone(),
                metadata: identity.metadata,
            })
            .await?;

        info!(
            %user_id,
            %platform,
            connection_id = %connection.id,
            platform_user_id = %identity.profile.id,
            "Platform connected"
        );
        Ok(connection)
    }
}

/// 32 random bytes, base64url without padding (43 characters)
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64_url::encode(&bytes)
}
