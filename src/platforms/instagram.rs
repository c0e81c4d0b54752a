//! Instagram via the Facebook Graph API
//!
//! Publishing requires an Instagram Business or Creator account linked to one
//! of the user's Facebook Pages, so identity resolution walks `/me/accounts`
//! until it finds a page carrying an `instagram_business_account`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info};

use super::{
    OAuthProvider, Platform, PlatformError, PlatformProfile, ResolvedIdentity, TokenResponse,
    TokenSet, app_credentials, read_json, url_with_params,
};
use crate::config::PlatformAppConfig;

/// Long-lived tokens last about 60 days when Graph omits `expires_in`
const LONG_LIVED_FALLBACK_DAYS: i64 = 60;

/// Upper bound on `/me/accounts` pages walked per lookup
const MAX_ACCOUNT_PAGES: usize = 20;

pub const NO_BUSINESS_ACCOUNT: &str = "No Instagram Business/Creator account linked to your Facebook Pages. Convert your Instagram account to a Business or Creator account and link it to a Facebook Page, then reconnect.";

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of the access token keyed by the app secret, hex encoded
pub fn appsecret_proof(app_secret: &str, access_token: &str) -> Result<String, PlatformError> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes()).map_err(|err| {
        PlatformError::Configuration {
            platform: Platform::Instagram.to_string(),
            details: format!("unusable app secret: {err}"),
        }
    })?;
    mac.update(access_token.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct AccountsPage {
    #[serde(default)]
    data: Vec<FacebookPage>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacebookPage {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    instagram_business_account: Option<BusinessAccount>,
}

#[derive(Debug, Deserialize)]
struct BusinessAccount {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    profile_picture_url: Option<String>,
}

pub struct InstagramProvider {
    client: reqwest::Client,
    config: PlatformAppConfig,
    client_id: String,
    client_secret: String,
}

impl InstagramProvider {
    pub fn new(config: &PlatformAppConfig, client: reqwest::Client) -> Result<Self, PlatformError> {
        let (client_id, client_secret) = app_credentials(config, Platform::Instagram)?;
        Ok(Self {
            client,
            config: config.clone(),
            client_id,
            client_secret,
        })
    }

    async fn get_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, PlatformError> {
        let response = self
            .client
            .get(&self.config.token_url)
            .query(params)
            .send()
            .await
            .map_err(|err| PlatformError::network(Platform::Instagram, err))?;
        read_json(Platform::Instagram, response).await
    }

    async fn accounts_page(&self, url: &str, token: &str) -> Result<AccountsPage, PlatformError> {
        let proof = appsecret_proof(&self.client_secret, token)?;
        let mut request = self.client.get(url);
        // `paging.next` links already carry their own query string
        if !url.contains("access_token=") {
            request = request.query(&[("access_token", token), ("appsecret_proof", proof.as_str())]);
        }
        let response = request
            .send()
            .await
            .map_err(|err| PlatformError::network(Platform::Instagram, err))?;
        read_json(Platform::Instagram, response).await
    }
}

#[async_trait]
impl OAuthProvider for InstagramProvider {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<url::Url, PlatformError> {
        let scope = self.config.scopes.join(",");
        url_with_params(
            Platform::Instagram,
            &self.config.authorize_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("scope", scope.as_str()),
                ("response_type", "code"),
            ],
        )
    }

    async fn exchange_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, PlatformError> {
        let response = self
            .get_token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .await?;

        debug!("Exchanged Instagram authorization code for a short-lived token");
        let mut tokens = response.into_token_set(',');
        if tokens.scopes.is_empty() {
            tokens.scopes = self.config.scopes.clone();
        }
        Ok(tokens)
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<ResolvedIdentity, PlatformError> {
        let mut next = Some(format!(
            "{}/me/accounts?fields=id,name,instagram_business_account{{id,username,name,profile_picture_url}}",
            self.config.api_base.trim_end_matches('/')
        ));
        let mut pages_walked = 0;

        while let Some(url) = next.take() {
            if pages_walked >= MAX_ACCOUNT_PAGES {
                break;
            }
            pages_walked += 1;

            let page = self.accounts_page(&url, &tokens.access_token).await?;

            let linked = page.data.into_iter().find_map(|page| {
                let account = page.instagram_business_account?;
                Some((page.id, page.name, account))
            });

            if let Some((page_id, page_name, account)) = linked {
                info!(
                    page_id = %page_id,
                    instagram_business_account_id = %account.id,
                    "Resolved Instagram business account"
                );
                return Ok(ResolvedIdentity {
                    profile: PlatformProfile {
                        id: account.id.clone(),
                        username: account.username,
                        name: account.name,
                        avatar: account.profile_picture_url,
                    },
                    metadata: json!({
                        "account_type": "business",
                        "instagram_business_account_id": account.id,
                        "page_id": page_id,
                        "page_name": page_name,
                    }),
                });
            }

            next = page.paging.and_then(|paging| paging.next);
        }

        Err(PlatformError::domain(Platform::Instagram, NO_BUSINESS_ACCOUNT))
    }

    async fn extend_token(&self, tokens: TokenSet) -> Result<TokenSet, PlatformError> {
        let response = self
            .get_token(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("fb_exchange_token", tokens.access_token.as_str()),
            ])
            .await?;

        let expires_in = response
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
            .unwrap_or_else(|| Duration::days(LONG_LIVED_FALLBACK_DAYS));

        debug!(expires_in_secs = expires_in.num_seconds(), "Upgraded Instagram token to long-lived");
        Ok(TokenSet {
            access_token: response.access_token,
            refresh_token: tokens.refresh_token,
            expires_at: Some(Utc::now() + expires_in),
            scopes: tokens.scopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appsecret_proof_matches_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        assert_eq!(
            appsecret_proof("key", "The quick brown fox jumps over the lazy dog").unwrap(),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_new_requires_credentials() {
        let config = PlatformAppConfig::instagram();
        let result = InstagramProvider::new(&config, reqwest::Client::new());
        assert!(matches!(result, Err(PlatformError::Configuration { .. })));
    }

    #[test]
    fn test_authorize_url_carries_state_and_scopes() {
        let mut config = PlatformAppConfig::instagram();
        config.client_id = Some("app-id".to_string());
        config.client_secret = Some("app-secret".to_string());
        let provider = InstagramProvider::new(&config, reqwest::Client::new()).unwrap();

        let url = provider
            .authorize_url("state-123", "http://localhost:8080/oauth/instagram/callback")
            .unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "app-id");
        assert_eq!(pairs["state"], "state-123");
        assert!(pairs["scope"].contains("instagram_content_publish"));
        assert!(!url.as_str().contains("app-secret"));
    }
}
