//! YouTube via Google OAuth and the Data API v3

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    OAuthProvider, Platform, PlatformError, PlatformProfile, ResolvedIdentity, TokenSet,
    app_credentials, post_token_form, read_json, url_with_params,
};
use crate::config::PlatformAppConfig;

pub const NO_CHANNEL: &str =
    "No YouTube channel found for this Google account. Create a YouTube channel first, then reconnect.";

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    id: String,
    #[serde(default)]
    snippet: Option<ChannelSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    custom_url: Option<String>,
    #[serde(default)]
    thumbnails: Option<serde_json::Value>,
}

pub struct YouTubeProvider {
    client: reqwest::Client,
    config: PlatformAppConfig,
    client_id: String,
    client_secret: String,
}

impl YouTubeProvider {
    pub fn new(config: &PlatformAppConfig, client: reqwest::Client) -> Result<Self, PlatformError> {
        let (client_id, client_secret) = app_credentials(config, Platform::YouTube)?;
        Ok(Self {
            client,
            config: config.clone(),
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl OAuthProvider for YouTubeProvider {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<url::Url, PlatformError> {
        let scope = self.config.scopes.join(" ");
        url_with_params(
            Platform::YouTube,
            &self.config.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
            ],
        )
    }

    async fn exchange_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, PlatformError> {
        let response = post_token_form(
            &self.client,
            Platform::YouTube,
            &self.config.token_url,
            &[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ],
        )
        .await?;

        Ok(response.into_token_set(' '))
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<ResolvedIdentity, PlatformError> {
        let response = self
            .client
            .get(format!(
                "{}/youtube/v3/channels",
                self.config.api_base.trim_end_matches('/')
            ))
            .query(&[("part", "snippet"), ("mine", "true")])
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|err| PlatformError::network(Platform::YouTube, err))?;

        let channels: ChannelList = read_json(Platform::YouTube, response).await?;
        let channel = channels
            .items
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::domain(Platform::YouTube, NO_CHANNEL))?;

        let snippet = channel.snippet.unwrap_or(ChannelSnippet {
            title: None,
            custom_url: None,
            thumbnails: None,
        });
        let avatar = snippet
            .thumbnails
            .as_ref()
            .and_then(|thumbs| thumbs.pointer("/default/url"))
            .and_then(|url| url.as_str())
            .map(str::to_string);

        debug!(channel_id = %channel.id, "Resolved YouTube channel");
        Ok(ResolvedIdentity {
            metadata: json!({
                "channel_id": channel.id,
                "channel_title": snippet.title,
            }),
            profile: PlatformProfile {
                id: channel.id,
                username: snippet.custom_url,
                name: snippet.title,
                avatar,
            },
        })
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet, PlatformError> {
        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            PlatformError::Unauthorized {
                platform: Platform::YouTube.to_string(),
                details: "no refresh token stored".to_string(),
            }
        })?;

        let response = post_token_form(
            &self.client,
            Platform::YouTube,
            &self.config.token_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
        )
        .await?;

        // Google rarely rotates refresh tokens; keep the stored one when absent
        let mut refreshed = response.into_token_set(' ');
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = tokens.refresh_token.clone();
        }
        if refreshed.scopes.is_empty() {
            refreshed.scopes = tokens.scopes.clone();
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_requests_offline_access() {
        let mut config = PlatformAppConfig::youtube();
        config.client_id = Some("google-client".to_string());
        config.client_secret = Some("google-secret".to_string());
        let provider = YouTubeProvider::new(&config, reqwest::Client::new()).unwrap();

        let url = provider
            .authorize_url("abc", "http://localhost/oauth/youtube/callback")
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["state"], "abc");
        assert!(pairs["scope"].contains("youtube.upload"));
    }
}
