//! Periodic cleanup of expired OAuth states.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::AppConfig;
use crate::repositories::OAuthStateRepository;

/// Background task deleting OAuth states past their expiry
pub struct StateCleanupService {
    config: Arc<AppConfig>,
    states: OAuthStateRepository,
}

impl StateCleanupService {
    pub fn new(config: Arc<AppConfig>, states: OAuthStateRepository) -> Self {
        Self { config, states }
    }

    /// Runs until `shutdown` fires
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.config.state_cleanup_interval_seconds.max(1));
        info!(interval_secs = interval.as_secs(), "Starting OAuth state cleanup");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(interval) => {
                    self.sweep().await;
                }
            }
        }

        info!("OAuth state cleanup stopped");
    }

    /// Deletes expired states once; returns how many were removed
    pub async fn sweep(&self) -> u64 {
        match self.states.cleanup_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "Deleted expired OAuth states");
                }
                counter!("oauth_states_expired_total").increment(removed);
                removed
            }
            Err(err) => {
                error!(error = %err, "OAuth state cleanup failed");
                0
            }
        }
    }
}
