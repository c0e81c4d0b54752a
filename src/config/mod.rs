//! Configuration loading for the publishing service.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `PUBLISHER_`, producing a typed [`AppConfig`]. Components receive the config
//! at construction and never read the process environment themselves.

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "PUBLISHER_";
const REDACTED: &str = "[REDACTED]";

/// Application configuration derived from `PUBLISHER_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    /// Hex-encoded AES-256 master key (64 characters).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    /// HS256 secret used to verify user session tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_jwt_secret: Option<String>,
    /// Opaque tokens for trusted server-to-server callers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_tokens: Vec<String>,
    /// Externally reachable base URL, used to build OAuth redirect URIs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Browser destination after an OAuth callback completes (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_redirect_url: Option<String>,
    #[serde(default = "default_oauth_state_ttl_minutes")]
    pub oauth_state_ttl_minutes: i64,
    #[serde(default = "default_state_cleanup_interval_seconds")]
    pub state_cleanup_interval_seconds: u64,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    /// Tokens expiring within this window are refreshed before publishing.
    #[serde(default = "default_token_refresh_lead_seconds")]
    pub token_refresh_lead_seconds: u64,
    #[serde(default = "PlatformAppConfig::instagram")]
    pub instagram: PlatformAppConfig,
    #[serde(default = "PlatformAppConfig::youtube")]
    pub youtube: PlatformAppConfig,
    #[serde(default = "PlatformAppConfig::tiktok")]
    pub tiktok: PlatformAppConfig,
    #[serde(default = "PlatformAppConfig::buffer")]
    pub buffer: PlatformAppConfig,
    #[serde(default = "PlatformAppConfig::hootsuite")]
    pub hootsuite: PlatformAppConfig,
    #[serde(default = "PlatformAppConfig::later")]
    pub later: PlatformAppConfig,
    #[serde(default = "PlatformAppConfig::sprout_social")]
    pub sprout_social: PlatformAppConfig,
    #[serde(default = "default_blotato_api_base")]
    pub blotato_api_base: String,
    #[serde(default)]
    pub polling: PollingConfig,
    /// Largest video the service downloads itself before re-uploading.
    #[serde(default = "default_video_download_max_bytes")]
    pub video_download_max_bytes: u64,
    /// Allows `video_url` to resolve to loopback or private addresses.
    #[serde(default)]
    pub allow_private_video_hosts: bool,
}

/// OAuth application credentials and endpoints for a single platform.
///
/// Endpoint URLs are configurable so tests can point them at a mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PlatformAppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
    /// Scopes requested in the authorization URL.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl PlatformAppConfig {
    fn with_endpoints(authorize_url: &str, token_url: &str, api_base: &str, scopes: &[&str]) -> Self {
        Self {
            client_id: None,
            client_secret: None,
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            api_base: api_base.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn instagram() -> Self {
        Self::with_endpoints(
            "https://www.facebook.com/v19.0/dialog/oauth",
            "https://graph.facebook.com/v19.0/oauth/access_token",
            "https://graph.facebook.com/v19.0",
            &[
                "instagram_basic",
                "instagram_content_publish",
                "pages_show_list",
                "pages_read_engagement",
                "business_management",
            ],
        )
    }

    pub fn youtube() -> Self {
        Self::with_endpoints(
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://www.googleapis.com",
            &[
                "https://www.googleapis.com/auth/youtube.upload",
                "https://www.googleapis.com/auth/youtube.readonly",
            ],
        )
    }

    pub fn tiktok() -> Self {
        Self::with_endpoints(
            "https://www.tiktok.com/v2/auth/authorize/",
            "https://open.tiktokapis.com/v2/oauth/token/",
            "https://open.tiktokapis.com/v2",
            &["user.info.basic", "video.publish", "video.upload"],
        )
    }

    pub fn buffer() -> Self {
        Self::with_endpoints(
            "https://bufferapp.com/oauth2/authorize",
            "https://api.bufferapp.com/1/oauth2/token.json",
            "https://api.bufferapp.com/1",
            &[],
        )
    }

    pub fn hootsuite() -> Self {
        Self::with_endpoints(
            "https://platform.hootsuite.com/oauth2/auth",
            "https://platform.hootsuite.com/oauth2/token",
            "https://platform.hootsuite.com/v1",
            &["offline"],
        )
    }

    pub fn later() -> Self {
        Self::with_endpoints(
            "https://app.later.com/oauth/authorize",
            "https://api.later.com/oauth/token",
            "https://api.later.com/v1",
            &["read", "write"],
        )
    }

    pub fn sprout_social() -> Self {
        Self::with_endpoints(
            "https://app.sproutsocial.com/oauth/authorize",
            "https://api.sproutsocial.com/oauth/token",
            "https://api.sproutsocial.com/v1",
            &[],
        )
    }

    /// Returns the client id/secret pair, or an error naming the missing platform.
    pub fn credentials(&self, platform: &str) -> Result<(&str, &str), ConfigError> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((id, secret)),
            _ => Err(ConfigError::MissingPlatformCredentials {
                platform: platform.to_string(),
            }),
        }
    }

    fn redact(&mut self) {
        if self.client_id.is_some() {
            self.client_id = Some(REDACTED.to_string());
        }
        if self.client_secret.is_some() {
            self.client_secret = Some(REDACTED.to_string());
        }
    }
}

/// Poll budgets for platforms with asynchronous processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollingConfig {
    pub instagram: PollBudgetConfig,
    pub tiktok: PollBudgetConfig,
    pub blotato: PollBudgetConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            instagram: PollBudgetConfig {
                max_attempts: 60,
                interval_ms: 5_000,
            },
            tiktok: PollBudgetConfig {
                max_attempts: 12,
                interval_ms: 5_000,
            },
            blotato: PollBudgetConfig {
                max_attempts: 24,
                interval_ms: 5_000,
            },
        }
    }
}

/// Attempt count and fixed interval between status checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PollBudgetConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl PollBudgetConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validate poll budget bounds
    pub fn validate(&self, platform: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > 1_000 || self.interval_ms > 300_000 {
            return Err(ConfigError::InvalidPollBudget {
                platform: platform.to_string(),
                max_attempts: self.max_attempts,
                interval_ms: self.interval_ms,
            });
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            master_key: None,
            session_jwt_secret: None,
            service_tokens: Vec::new(),
            public_base_url: default_public_base_url(),
            dashboard_redirect_url: None,
            oauth_state_ttl_minutes: default_oauth_state_ttl_minutes(),
            state_cleanup_interval_seconds: default_state_cleanup_interval_seconds(),
            http_timeout_seconds: default_http_timeout_seconds(),
            token_refresh_lead_seconds: default_token_refresh_lead_seconds(),
            instagram: PlatformAppConfig::instagram(),
            youtube: PlatformAppConfig::youtube(),
            tiktok: PlatformAppConfig::tiktok(),
            buffer: PlatformAppConfig::buffer(),
            hootsuite: PlatformAppConfig::hootsuite(),
            later: PlatformAppConfig::later(),
            sprout_social: PlatformAppConfig::sprout_social(),
            blotato_api_base: default_blotato_api_base(),
            polling: PollingConfig::default(),
            video_download_max_bytes: default_video_download_max_bytes(),
            allow_private_video_hosts: false,
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Redirect URI registered with a platform for the OAuth callback.
    pub fn redirect_uri(&self, platform: &str) -> String {
        format!(
            "{}/oauth/{}/callback",
            self.public_base_url.trim_end_matches('/'),
            platform
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.master_key.is_some() {
            config.master_key = Some(REDACTED.to_string());
        }
        if config.session_jwt_secret.is_some() {
            config.session_jwt_secret = Some(REDACTED.to_string());
        }
        if !config.service_tokens.is_empty() {
            config.service_tokens = vec![REDACTED.to_string()];
        }
        for platform in [
            &mut config.instagram,
            &mut config.youtube,
            &mut config.tiktok,
            &mut config.buffer,
            &mut config.hootsuite,
            &mut config.later,
            &mut config.sprout_social,
        ] {
            platform.redact();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates settings that must hold for the process to start.
    ///
    /// The master key and platform credentials are checked where they are used so
    /// callers receive a 503 with an operator hint instead of a dead process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(source) = self.bind_addr() {
            return Err(ConfigError::InvalidBindAddr {
                value: self.api_bind_addr.clone(),
                source,
            });
        }

        if self.oauth_state_ttl_minutes <= 0 || self.oauth_state_ttl_minutes > 60 {
            return Err(ConfigError::InvalidStateTtl {
                value: self.oauth_state_ttl_minutes,
            });
        }

        self.polling.instagram.validate("instagram")?;
        self.polling.tiktok.validate("tiktok")?;
        self.polling.blotato.validate("blotato")?;

        if self.video_download_max_bytes == 0 {
            return Err(ConfigError::InvalidDownloadLimit);
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/publisher".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_public_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_oauth_state_ttl_minutes() -> i64 {
    15
}

fn default_state_cleanup_interval_seconds() -> u64 {
    600 // 10 minutes
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_token_refresh_lead_seconds() -> u64 {
    300 // 5 minutes
}

fn default_blotato_api_base() -> String {
    "https://backend.blotato.com/v2".to_string()
}

fn default_video_download_max_bytes() -> u64 {
    512 * 1024 * 1024
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("oauth state ttl must be between 1 and 60 minutes, got {value}")]
    InvalidStateTtl { value: i64 },
    #[error(
        "{platform} poll budget must allow 1..=1000 attempts with an interval of at most 300000ms, got {max_attempts} attempts every {interval_ms}ms"
    )]
    InvalidPollBudget {
        platform: String,
        max_attempts: u32,
        interval_ms: u64,
    },
    #[error("video download limit must be greater than zero")]
    InvalidDownloadLimit,
    #[error("master key is missing; set PUBLISHER_MASTER_KEY to 64 hex characters")]
    MissingMasterKey,
    #[error("master key is invalid: {reason}; set PUBLISHER_MASTER_KEY to 64 hex characters")]
    InvalidMasterKey { reason: String },
    #[error("session secret is missing; set PUBLISHER_SESSION_JWT_SECRET")]
    MissingSessionSecret,
    #[error(
        "{platform} app credentials are missing; set PUBLISHER_{}_CLIENT_ID and PUBLISHER_{}_CLIENT_SECRET",
        platform.to_uppercase(),
        platform.to_uppercase()
    )]
    MissingPlatformCredentials { platform: String },
}

/// Loads configuration using layered `.env` files and `PUBLISHER_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from dotenv layers and the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        Self::from_layered(layered, profile_hint)
    }

    /// Builds a config from already-collected `KEY -> value` pairs (prefix stripped).
    pub fn from_layered(
        mut layered: BTreeMap<String, String>,
        profile_hint: String,
    ) -> Result<AppConfig, ConfigError> {
        let defaults = AppConfig::default();

        let profile = take_non_empty(&mut layered, "PROFILE").unwrap_or(profile_hint);

        // Handle service tokens - support both single token and comma-separated list
        let service_tokens = if let Some(tokens) = layered.remove("SERVICE_TOKENS") {
            tokens
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else if let Some(token) = take_non_empty(&mut layered, "SERVICE_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let polling = PollingConfig {
            instagram: take_poll_budget(&mut layered, "INSTAGRAM", defaults.polling.instagram),
            tiktok: take_poll_budget(&mut layered, "TIKTOK", defaults.polling.tiktok),
            blotato: take_poll_budget(&mut layered, "BLOTATO", defaults.polling.blotato),
        };

        let config = AppConfig {
            profile,
            api_bind_addr: take_non_empty(&mut layered, "API_BIND_ADDR")
                .unwrap_or(defaults.api_bind_addr),
            log_level: take_non_empty(&mut layered, "LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: take_non_empty(&mut layered, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: take_non_empty(&mut layered, "DATABASE_URL")
                .unwrap_or(defaults.database_url),
            db_max_connections: take_parsed(&mut layered, "DB_MAX_CONNECTIONS")
                .unwrap_or(defaults.db_max_connections),
            db_acquire_timeout_ms: take_parsed(&mut layered, "DB_ACQUIRE_TIMEOUT_MS")
                .unwrap_or(defaults.db_acquire_timeout_ms),
            master_key: take_non_empty(&mut layered, "MASTER_KEY"),
            session_jwt_secret: take_non_empty(&mut layered, "SESSION_JWT_SECRET"),
            service_tokens,
            public_base_url: take_non_empty(&mut layered, "PUBLIC_BASE_URL")
                .unwrap_or(defaults.public_base_url),
            dashboard_redirect_url: take_non_empty(&mut layered, "DASHBOARD_REDIRECT_URL"),
            oauth_state_ttl_minutes: take_parsed(&mut layered, "OAUTH_STATE_TTL_MINUTES")
                .unwrap_or(defaults.oauth_state_ttl_minutes),
            state_cleanup_interval_seconds: take_parsed(
                &mut layered,
                "STATE_CLEANUP_INTERVAL_SECONDS",
            )
            .unwrap_or(defaults.state_cleanup_interval_seconds),
            http_timeout_seconds: take_parsed(&mut layered, "HTTP_TIMEOUT_SECONDS")
                .unwrap_or(defaults.http_timeout_seconds),
            token_refresh_lead_seconds: take_parsed(&mut layered, "TOKEN_REFRESH_LEAD_SECONDS")
                .unwrap_or(defaults.token_refresh_lead_seconds),
            instagram: take_platform(&mut layered, "INSTAGRAM", defaults.instagram),
            youtube: take_platform(&mut layered, "YOUTUBE", defaults.youtube),
            tiktok: take_platform(&mut layered, "TIKTOK", defaults.tiktok),
            buffer: take_platform(&mut layered, "BUFFER", defaults.buffer),
            hootsuite: take_platform(&mut layered, "HOOTSUITE", defaults.hootsuite),
            later: take_platform(&mut layered, "LATER", defaults.later),
            sprout_social: take_platform(&mut layered, "SPROUT_SOCIAL", defaults.sprout_social),
            blotato_api_base: take_non_empty(&mut layered, "BLOTATO_API_BASE")
                .unwrap_or(defaults.blotato_api_base),
            polling,
            video_download_max_bytes: take_parsed(&mut layered, "VIDEO_DOWNLOAD_MAX_BYTES")
                .unwrap_or(defaults.video_download_max_bytes),
            allow_private_video_hosts: take_parsed(&mut layered, "ALLOW_PRIVATE_VIDEO_HOSTS")
                .unwrap_or(defaults.allow_private_video_hosts),
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var(format!("{ENV_PREFIX}PROFILE"))
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn take_non_empty(layered: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
    layered
        .remove(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn take_parsed<T: std::str::FromStr>(layered: &mut BTreeMap<String, String>, key: &str) -> Option<T> {
    layered.remove(key).and_then(|v| v.trim().parse().ok())
}

fn take_platform(
    layered: &mut BTreeMap<String, String>,
    prefix: &str,
    defaults: PlatformAppConfig,
) -> PlatformAppConfig {
    let scopes = take_non_empty(layered, &format!("{prefix}_SCOPES"))
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or(defaults.scopes);

    PlatformAppConfig {
        client_id: take_non_empty(layered, &format!("{prefix}_CLIENT_ID")),
        client_secret: take_non_empty(layered, &format!("{prefix}_CLIENT_SECRET")),
        authorize_url: take_non_empty(layered, &format!("{prefix}_AUTHORIZE_URL"))
            .unwrap_or(defaults.authorize_url),
        token_url: take_non_empty(layered, &format!("{prefix}_TOKEN_URL"))
            .unwrap_or(defaults.token_url),
        api_base: take_non_empty(layered, &format!("{prefix}_API_BASE"))
            .unwrap_or(defaults.api_base),
        scopes,
    }
}

fn take_poll_budget(
    layered: &mut BTreeMap<String, String>,
    prefix: &str,
    defaults: PollBudgetConfig,
) -> PollBudgetConfig {
    PollBudgetConfig {
        max_attempts: take_parsed(layered, &format!("{prefix}_POLL_MAX_ATTEMPTS"))
            .unwrap_or(defaults.max_attempts),
        interval_ms: take_parsed(layered, &format!("{prefix}_POLL_INTERVAL_MS"))
            .unwrap_or(defaults.interval_ms),
    }
}
