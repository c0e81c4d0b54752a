//! Test utilities shared by the integration tests.
//!
//! In-memory SQLite with migrations, a config pointing every platform at a
//! mock server, a sleeper that never waits, and an in-process HTTP server.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header, encode};
use migration::{Migrator, MigratorTrait};
use publisher::auth::SessionClaims;
use publisher::config::{AppConfig, PlatformAppConfig, PollBudgetConfig, PollingConfig};
use publisher::credentials::{ClientContext, CredentialStore};
use publisher::models::oauth_connection;
use publisher::platforms::TokenSet;
use publisher::publish::Sleeper;
use publisher::repositories::{ConnectionRepository, ConnectionUpsert};
use publisher::server::{AppState, create_app};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use uuid::Uuid;

pub const TEST_MASTER_KEY: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const TEST_JWT_SECRET: &str = "integration-session-secret";
pub const TEST_SERVICE_TOKEN: &str = "integration-service-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

fn mock_platform(mock_base: &str, name: &str) -> PlatformAppConfig {
    PlatformAppConfig {
        client_id: Some(format!("{name}-client-id")),
        client_secret: Some(format!("{name}-client-secret")),
        authorize_url: format!("{mock_base}/{name}/authorize"),
        token_url: format!("{mock_base}/{name}/token"),
        api_base: mock_base.to_string(),
        scopes: vec![format!("{name}.publish")],
    }
}

/// Config with every platform endpoint pointing at `mock_base`
pub fn test_config(mock_base: &str) -> AppConfig {
    let budget = |max_attempts| PollBudgetConfig {
        max_attempts,
        interval_ms: 5_000,
    };
    AppConfig {
        profile: "test".to_string(),
        master_key: Some(TEST_MASTER_KEY.to_string()),
        session_jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        service_tokens: vec![TEST_SERVICE_TOKEN.to_string()],
        public_base_url: "http://publisher.test".to_string(),
        instagram: mock_platform(mock_base, "instagram"),
        youtube: mock_platform(mock_base, "youtube"),
        tiktok: mock_platform(mock_base, "tiktok"),
        buffer: mock_platform(mock_base, "buffer"),
        hootsuite: mock_platform(mock_base, "hootsuite"),
        later: mock_platform(mock_base, "later"),
        sprout_social: mock_platform(mock_base, "sprout_social"),
        blotato_api_base: format!("{mock_base}/blotato/v2"),
        polling: PollingConfig {
            instagram: budget(60),
            tiktok: budget(12),
            blotato: budget(24),
        },
        // Mock servers listen on loopback
        allow_private_video_hosts: true,
        ..Default::default()
    }
}

/// Sleeper that returns immediately and counts calls
#[derive(Debug, Default)]
pub struct InstantSleeper {
    sleeps: AtomicU32,
}

impl InstantSleeper {
    pub fn count(&self) -> u32 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sleeper for InstantSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds application state over `db` with an instant sleeper
pub fn test_state(config: AppConfig, db: DatabaseConnection) -> (AppState, Arc<InstantSleeper>) {
    let sleeper = Arc::new(InstantSleeper::default());
    let state = AppState::with_parts(
        Arc::new(config),
        db,
        reqwest::Client::new(),
        sleeper.clone(),
    );
    (state, sleeper)
}

pub struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl TestServerHandle {
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }
        Ok(())
    }
}

/// Serves `state` on a random local port and returns its base URL
pub async fn spawn_test_app(state: AppState) -> (String, TestServerHandle) {
    let app = create_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .context("axum server error")
    });

    (
        format!("http://{addr}"),
        TestServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(server_task),
        },
    )
}

/// Signed session token for `user_id`, valid for an hour
pub fn session_token(user_id: Uuid) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
    encode(
        &Header::default(),
        &SessionClaims {
            sub: user_id.to_string(),
            exp,
        },
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn tokens(access: &str, refresh: Option<&str>, expires_in_secs: Option<i64>) -> TokenSet {
    TokenSet {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        expires_at: expires_in_secs.map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        scopes: vec!["publish".to_string()],
    }
}

/// Stores a connected connection with sealed tokens
pub async fn insert_connection(
    db: &Arc<DatabaseConnection>,
    credentials: &CredentialStore,
    user_id: Uuid,
    platform: &str,
    tokens: Option<&TokenSet>,
    username: Option<&str>,
    metadata: Value,
) -> Result<oauth_connection::Model> {
    let sealed = tokens
        .map(|tokens| {
            credentials.seal_tokens(user_id, platform, tokens, &ClientContext::default())
        })
        .transpose()?;

    ConnectionRepository::new(db.clone())
        .upsert_connection(ConnectionUpsert {
            user_id,
            platform_name: platform.to_string(),
            tokens: sealed,
            platform_user_id: Some(format!("{platform}-user-1")),
            platform_username: username.map(str::to_string),
            scopes: vec!["publish".to_string()],
            metadata,
        })
        .await
}
