//! Platform OAuth integrations
//!
//! Each social platform implements [`OAuthProvider`]: build the authorization
//! URL, trade the callback code for tokens, resolve the platform-side identity
//! and optionally upgrade or refresh tokens. Providers are looked up by name in
//! the [`ProviderRegistry`], so adding a platform is additive.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::PlatformAppConfig;
use crate::error::{ApiError, configuration_error};

pub mod aggregators;
pub mod instagram;
pub mod registry;
pub mod tiktok;
pub mod youtube;

pub use aggregators::AggregatorProvider;
pub use instagram::InstagramProvider;
pub use registry::ProviderRegistry;
pub use tiktok::TikTokProvider;
pub use youtube::YouTubeProvider;

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Instagram,
    #[serde(rename = "youtube")]
    YouTube,
    #[serde(rename = "tiktok")]
    TikTok,
    Buffer,
    Hootsuite,
    Later,
    SproutSocial,
}

impl Platform {
    pub const ALL: [Platform; 7] = [
        Platform::Instagram,
        Platform::YouTube,
        Platform::TikTok,
        Platform::Buffer,
        Platform::Hootsuite,
        Platform::Later,
        Platform::SproutSocial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::YouTube => "youtube",
            Platform::TikTok => "tiktok",
            Platform::Buffer => "buffer",
            Platform::Hootsuite => "hootsuite",
            Platform::Later => "later",
            Platform::SproutSocial => "sprout_social",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|platform| platform.as_str() == s)
            .ok_or_else(|| PlatformError::UnknownPlatform(s.to_string()))
    }
}

/// OAuth tokens in plaintext. Only ever held in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl TokenSet {
    /// Whether the access token expires within `lead`
    pub fn expires_within(&self, lead: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Utc::now() + lead)
    }
}

/// Common profile shape every platform maps into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlatformProfile {
    pub id: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Identity resolved after the token exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub profile: PlatformProfile,
    /// Stored as `connection_metadata`
    pub metadata: JsonValue,
}

/// Errors raised while talking to a platform
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),
    /// App credentials for the platform are not configured
    #[error("{platform} is not configured: {details}")]
    Configuration { platform: String, details: String },
    /// The platform answered with a non-success status
    #[error("{platform} returned HTTP {status}: {message}")]
    Http {
        platform: String,
        status: u16,
        message: String,
    },
    /// The platform rejected the credentials
    #[error("{platform} rejected the credentials: {details}")]
    Unauthorized { platform: String, details: String },
    /// A user-actionable condition on the platform side
    #[error("{message}")]
    Domain { platform: String, message: String },
    #[error("network error talking to {platform}: {details}")]
    Network { platform: String, details: String },
    #[error("malformed response from {platform}: {details}")]
    MalformedResponse { platform: String, details: String },
    #[error("{platform} does not support {operation}")]
    Unsupported { platform: String, operation: String },
}

impl PlatformError {
    pub fn network(platform: Platform, error: reqwest::Error) -> Self {
        PlatformError::Network {
            platform: platform.to_string(),
            details: error.to_string(),
        }
    }

    pub fn malformed(platform: Platform, details: impl Into<String>) -> Self {
        PlatformError::MalformedResponse {
            platform: platform.to_string(),
            details: details.into(),
        }
    }

    pub fn domain(platform: Platform, message: impl Into<String>) -> Self {
        PlatformError::Domain {
            platform: platform.to_string(),
            message: message.into(),
        }
    }

    /// 4xx other than auth failures
    pub fn is_client_error(&self) -> bool {
        matches!(self, PlatformError::Http { status, .. } if (400..500).contains(status))
    }

    /// 5xx, network failures and garbled responses
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Http { status, .. } => *status >= 500,
            PlatformError::Network { .. } | PlatformError::MalformedResponse { .. } => true,
            _ => false,
        }
    }
}

impl From<PlatformError> for ApiError {
    fn from(error: PlatformError) -> Self {
        match error {
            PlatformError::UnknownPlatform(name) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "unsupported_platform",
                format!("Platform '{name}' is not supported"),
            ),
            PlatformError::Configuration { platform, details } => {
                tracing::error!(%platform, %details, "Platform is not configured");
                configuration_error(&format!("{platform} integration is not configured"), &details)
            }
            PlatformError::Domain { message, .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "account_not_eligible", message)
            }
            PlatformError::Unauthorized { platform, .. } => ApiError::new(
                StatusCode::BAD_REQUEST,
                "not_connected",
                format!("{platform} rejected the stored credentials; reconnect your account"),
            ),
            other => {
                tracing::error!(error = %other, "Platform request failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_unavailable",
                    "The platform could not complete the request; please try again later",
                )
            }
        }
    }
}

/// Capability set every OAuth platform implements
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Authorization URL the user's browser is sent to
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> Result<url::Url, PlatformError>;

    /// Trades an authorization code for tokens
    async fn exchange_token(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenSet, PlatformError>;

    /// Resolves the platform account the tokens act for
    async fn fetch_profile(&self, tokens: &TokenSet) -> Result<ResolvedIdentity, PlatformError>;

    /// Upgrades a short-lived token where the platform supports it
    async fn extend_token(&self, tokens: TokenSet) -> Result<TokenSet, PlatformError> {
        Ok(tokens)
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    async fn refresh(&self, _tokens: &TokenSet) -> Result<TokenSet, PlatformError> {
        Err(PlatformError::Unsupported {
            platform: self.platform().to_string(),
            operation: "token refresh".to_string(),
        })
    }
}

/// Standard OAuth 2.0 token response
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_token_set(self, scope_separator: char) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes: self
                .scope
                .map(|scope| {
                    scope
                        .split(scope_separator)
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Resolves the app's client id and secret for a provider
pub(crate) fn app_credentials(
    config: &PlatformAppConfig,
    platform: Platform,
) -> Result<(String, String), PlatformError> {
    config
        .credentials(platform.as_str())
        .map(|(id, secret)| (id.to_string(), secret.to_string()))
        .map_err(|err| PlatformError::Configuration {
            platform: platform.to_string(),
            details: err.to_string(),
        })
}

/// Posts a form-encoded token request and decodes the standard response
pub(crate) async fn post_token_form(
    client: &reqwest::Client,
    platform: Platform,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, PlatformError> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(|err| PlatformError::network(platform, err))?;

    read_json(platform, response).await
}

/// Builds the shared HTTP client used for every platform call
pub fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("publisher/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Appends query parameters to a configured base URL
pub(crate) fn url_with_params(
    platform: Platform,
    base: &str,
    params: &[(&str, &str)],
) -> Result<url::Url, PlatformError> {
    let mut url = url::Url::parse(base).map_err(|err| PlatformError::Configuration {
        platform: platform.to_string(),
        details: format!("invalid URL '{base}': {err}"),
    })?;
    url.query_pairs_mut().extend_pairs(params.iter());
    Ok(url)
}

/// Reads a JSON body, mapping non-success statuses to [`PlatformError`]
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    platform: Platform,
    response: reqwest::Response,
) -> Result<T, PlatformError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(platform, status.as_u16(), &body));
    }

    response
        .json::<T>()
        .await
        .map_err(|err| PlatformError::malformed(platform, err.to_string()))
}

/// Maps a failed response into the error taxonomy
pub(crate) fn status_error(platform: Platform, status: u16, body: &str) -> PlatformError {
    let message = upstream_message(body);
    tracing::warn!(platform = %platform, status, body = %truncate(body, 500), "Platform request failed");

    // Graph API reports expired or revoked tokens as OAuthException code 190
    let graph_token_error = serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|json| json.pointer("/error/code").and_then(JsonValue::as_i64))
        == Some(190);

    if status == 401 || graph_token_error {
        return PlatformError::Unauthorized {
            platform: platform.to_string(),
            details: message,
        };
    }

    PlatformError::Http {
        platform: platform.to_string(),
        status,
        message,
    }
}

/// Extracts the most useful human-readable message from an error body
pub(crate) fn upstream_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<JsonValue>(body) {
        let candidates = [
            json.pointer("/error/error_user_msg"),
            json.pointer("/error/message"),
            json.pointer("/error_description"),
            json.pointer("/message"),
            json.pointer("/error"),
        ];
        if let Some(message) = candidates
            .into_iter()
            .flatten()
            .find_map(|value| value.as_str().filter(|s| !s.is_empty()))
        {
            return message.to_string();
        }
    }

    if body.trim().is_empty() {
        "no response body".to_string()
    } else {
        truncate(body.trim(), 200)
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() > max_chars {
        let truncated: String = value.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_names_round_trip() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
            assert_eq!(
                serde_json::to_value(platform).unwrap(),
                serde_json::Value::String(platform.as_str().to_string())
            );
        }
        assert!("twitter".parse::<Platform>().is_err());
    }

    #[test]
    fn test_upstream_message_prefers_structured_fields() {
        assert_eq!(
            upstream_message(r#"{"error":{"message":"Invalid video format","code":100}}"#),
            "Invalid video format"
        );
        assert_eq!(
            upstream_message(r#"{"error":"invalid_grant","error_description":"Code expired"}"#),
            "Code expired"
        );
        assert_eq!(upstream_message(""), "no response body");
        assert_eq!(upstream_message("x".repeat(300).as_str()).chars().count(), 203);
    }

    #[test]
    fn test_status_error_classification() {
        let unauthorized = status_error(Platform::YouTube, 401, "{}");
        assert!(matches!(unauthorized, PlatformError::Unauthorized { .. }));

        let graph_expired = status_error(
            Platform::Instagram,
            400,
            r#"{"error":{"message":"Session has expired","type":"OAuthException","code":190}}"#,
        );
        assert!(matches!(graph_expired, PlatformError::Unauthorized { .. }));

        let rejected = status_error(Platform::Instagram, 400, r#"{"error":{"message":"bad"}}"#);
        assert!(rejected.is_client_error());
        assert!(!rejected.is_transient());

        let unavailable = status_error(Platform::TikTok, 503, "");
        assert!(unavailable.is_transient());
    }

    #[test]
    fn test_token_set_debug_is_redacted() {
        let tokens = TokenSet {
            access_token: "secret-access".to_string(),
            refresh_token: Some("secret-refresh".to_string()),
            expires_at: None,
            scopes: vec![],
        };
        let rendered = format!("{tokens:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-refresh"));
    }

    #[test]
    fn test_expires_within() {
        let mut tokens = TokenSet {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::seconds(60)),
            scopes: vec![],
        };
        assert!(tokens.expires_within(Duration::seconds(300)));
        tokens.expires_at = Some(Utc::now() + Duration::hours(2));
        assert!(!tokens.expires_within(Duration::seconds(300)));
        tokens.expires_at = None;
        assert!(!tokens.expires_within(Duration::seconds(300)));
    }
}
