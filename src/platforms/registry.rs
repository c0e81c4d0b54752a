//! Provider registry
//!
//! Maps each platform to its [`OAuthProvider`]. Built once from configuration
//! and shared through application state.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::{
    AggregatorProvider, InstagramProvider, OAuthProvider, Platform, PlatformError, TikTokProvider,
    YouTubeProvider,
};
use crate::config::{AppConfig, PlatformAppConfig};

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Platform, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every platform whose app credentials are configured
    pub fn from_config(config: &AppConfig, client: reqwest::Client) -> Self {
        let mut registry = Self::new();

        for platform in Platform::ALL {
            let app = platform_config(config, platform);
            let provider: Result<Arc<dyn OAuthProvider>, PlatformError> = match platform {
                Platform::Instagram => InstagramProvider::new(app, client.clone())
                    .map(|p| Arc::new(p) as Arc<dyn OAuthProvider>),
                Platform::YouTube => YouTubeProvider::new(app, client.clone())
                    .map(|p| Arc::new(p) as Arc<dyn OAuthProvider>),
                Platform::TikTok => TikTokProvider::new(app, client.clone())
                    .map(|p| Arc::new(p) as Arc<dyn OAuthProvider>),
                Platform::Buffer
                | Platform::Hootsuite
                | Platform::Later
                | Platform::SproutSocial => AggregatorProvider::new(platform, app, client.clone())
                    .map(|p| Arc::new(p) as Arc<dyn OAuthProvider>),
            };

            match provider {
                Ok(provider) => registry.register(provider),
                Err(err) => warn!(platform = %platform, error = %err, "Platform not registered"),
            }
        }

        info!(
            platforms = ?registry.platforms(),
            "Provider registry initialized"
        );
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    /// Looks up a provider; unconfigured platforms are a configuration error
    pub fn get(&self, platform: Platform) -> Result<Arc<dyn OAuthProvider>, PlatformError> {
        self.providers
            .get(&platform)
            .cloned()
            .ok_or_else(|| PlatformError::Configuration {
                platform: platform.to_string(),
                details: format!(
                    "set PUBLISHER_{}_CLIENT_ID and PUBLISHER_{}_CLIENT_SECRET",
                    platform.as_str().to_uppercase(),
                    platform.as_str().to_uppercase()
                ),
            })
    }

    /// Registered platforms in stable order
    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<_> = self.providers.keys().copied().collect();
        platforms.sort();
        platforms
    }
}

/// App settings block for a platform
pub fn platform_config(config: &AppConfig, platform: Platform) -> &PlatformAppConfig {
    match platform {
        Platform::Instagram => &config.instagram,
        Platform::YouTube => &config.youtube,
        Platform::TikTok => &config.tiktok,
        Platform::Buffer => &config.buffer,
        Platform::Hootsuite => &config.hootsuite,
        Platform::Later => &config.later,
        Platform::SproutSocial => &config.sprout_social,
    }
}
