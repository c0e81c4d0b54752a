//! TikTok Login Kit (v2 API)
//!
//! TikTok answers some failures with HTTP 200 and an `error` field in the
//! body, so every response is checked for both.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    OAuthProvider, Platform, PlatformError, PlatformProfile, ResolvedIdentity, TokenSet,
    app_credentials, read_json, url_with_params,
};
use crate::config::PlatformAppConfig;

/// Connection metadata tag for connections that publish through TikTok's own API
pub const METHOD_DIRECT: &str = "direct";

#[derive(Debug, Deserialize)]
struct TikTokTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    open_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    #[serde(default)]
    data: Option<UserInfoData>,
    #[serde(default)]
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct UserInfoData {
    user: TikTokUser,
}

#[derive(Debug, Deserialize)]
struct TikTokUser {
    open_id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

/// Envelope status carried by every TikTok v2 API response
#[derive(Debug, Clone, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ApiStatus {
    pub fn is_ok(&self) -> bool {
        self.code.is_empty() || self.code == "ok"
    }
}

pub struct TikTokProvider {
    client: reqwest::Client,
    config: PlatformAppConfig,
    client_key: String,
    client_secret: String,
}

impl TikTokProvider {
    pub fn new(config: &PlatformAppConfig, client: reqwest::Client) -> Result<Self, PlatformError> {
        let (client_key, client_secret) = app_credentials(config, Platform::TikTok)?;
        Ok(Self {
            client,
            config: config.clone(),
            client_key,
            client_secret,
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, PlatformError> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|err| PlatformError::network(Platform::TikTok, err))?;

        let body: TikTokTokenResponse = read_json(Platform::TikTok, response).await?;

        if let Some(error) = body.error.filter(|e| !e.is_empty()) {
            return Err(PlatformError::Http {
                platform: Platform::TikTok.to_string(),
                status: 400,
                message: body.error_description.unwrap_or(error),
            });
        }

        let access_token = body
            .access_token
            .ok_or_else(|| PlatformError::malformed(Platform::TikTok, "token response without access_token"))?;

        debug!(open_id = ?body.open_id, "Received TikTok tokens");
        Ok(TokenSet {
            access_token,
            refresh_token: body.refresh_token,
            expires_at: body
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes: body
                .scope
                .map(|scope| scope.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl OAuthProvider for TikTokProvider {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<url::Url, PlatformError> {
        let scope = self.config.scopes.join(",");
        url_with_params(
            Platform::TikTok,
            &self.config.authorize_url,
            &[
                ("client_key", self.client_key.as_str()),
                ("scope", scope.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("state", state),
            ],
        )
    }

    async fn exchange_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, PlatformError> {
        self.token_request(&[
            ("client_key", self.client_key.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<ResolvedIdentity, PlatformError> {
        let response = self
            .client
            .get(format!("{}/user/info/", self.config.api_base.trim_end_matches('/')))
            .query(&[("fields", "open_id,avatar_url,display_name,username")])
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|err| PlatformError::network(Platform::TikTok, err))?;

        let body: UserInfoResponse = read_json(Platform::TikTok, response).await?;
        if let Some(status) = body.error.filter(|status| !status.is_ok()) {
            return Err(PlatformError::Http {
                platform: Platform::TikTok.to_string(),
                status: 400,
                message: status.message,
            });
        }

        let user = body
            .data
            .map(|data| data.user)
            .ok_or_else(|| PlatformError::malformed(Platform::TikTok, "user info without data"))?;

        Ok(ResolvedIdentity {
            metadata: json!({
                "method": METHOD_DIRECT,
                "open_id": user.open_id,
            }),
            profile: PlatformProfile {
                id: user.open_id,
                username: user.username,
                name: user.display_name,
                avatar: user.avatar_url,
            },
        })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet, PlatformError> {
        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Unauthorized {
                platform: Platform::TikTok.to_string(),
                details: "no refresh token stored".to_string(),
            }
        })?;

        let mut refreshed = self
            .token_request(&[
                ("client_key", self.client_key.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = tokens.refresh_token.clone();
        }
        if refreshed.scopes.is_empty() {
            refreshed.scopes = tokens.scopes.clone();
        }
        Ok(refreshed)
    }
}
