//! # Server Configuration
//!
//! Router assembly, shared state and the serve loop for the publishing API.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::credentials::CredentialStore;
use crate::handlers;
use crate::maintenance::StateCleanupService;
use crate::oauth::OAuthFlow;
use crate::platforms::{ProviderRegistry, http_client};
use crate::publish::{PublishOrchestrator, PublisherSet, Sleeper, TokioSleeper};
use crate::repositories::{ConnectionRepository, OAuthStateRepository, PublishedVideoRepository};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub registry: Arc<ProviderRegistry>,
    pub oauth: OAuthFlow,
    pub orchestrator: PublishOrchestrator,
    pub publishers: PublisherSet,
    pub credentials: CredentialStore,
    pub connections: ConnectionRepository,
    pub states: OAuthStateRepository,
    pub videos: PublishedVideoRepository,
    /// Cancelled on shutdown; in-flight publishes observe a child token
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires every component from `config`
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> Self {
        let client = http_client(config.http_timeout());
        Self::with_parts(config, db, client, Arc::new(TokioSleeper))
    }

    /// Same as [`AppState::new`] with an explicit HTTP client and poll sleeper
    pub fn with_parts(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        client: reqwest::Client,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let shared_db = Arc::new(db.clone());
        let registry = Arc::new(ProviderRegistry::from_config(&config, client.clone()));
        let credentials = CredentialStore::new(shared_db.clone(), &config);
        let connections = ConnectionRepository::new(shared_db.clone());
        let states = OAuthStateRepository::new(shared_db.clone());
        let videos = PublishedVideoRepository::new(shared_db);

        let oauth = OAuthFlow::new(
            config.clone(),
            registry.clone(),
            states.clone(),
            connections.clone(),
            credentials.clone(),
        );
        let orchestrator = PublishOrchestrator::new(
            config.clone(),
            registry.clone(),
            connections.clone(),
            credentials.clone(),
            videos.clone(),
        );
        let publishers = PublisherSet::from_config(&config, client, credentials.clone(), sleeper);

        Self {
            config,
            db,
            registry,
            oauth,
            orchestrator,
            publishers,
            credentials,
            connections,
            states,
            videos,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route("/oauth/{platform}/start", post(handlers::oauth::start_oauth))
        .route("/connections", get(handlers::connections::list_connections))
        .route(
            "/connections/tiktok/blotato",
            post(handlers::connections::connect_tiktok_blotato),
        )
        .route(
            "/connections/{platform}",
            delete(handlers::connections::delete_connection),
        )
        .route(
            "/secrets/{service}",
            get(handlers::secrets::get_secret_status)
                .put(handlers::secrets::put_secret)
                .delete(handlers::secrets::delete_secret),
        )
        .route(
            "/published-videos",
            post(handlers::published_videos::create_published_video),
        )
        .route(
            "/published-videos/{id}",
            get(handlers::published_videos::get_published_video),
        )
        .route("/publish/instagram", post(handlers::publish::publish_instagram))
        .route("/publish/tiktok", post(handlers::publish::publish_tiktok))
        .route(
            "/publish/tiktok/blotato",
            post(handlers::publish::publish_tiktok_blotato),
        )
        .route("/publish/youtube", post(handlers::publish::publish_youtube))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/oauth/{platform}/callback",
            get(handlers::oauth::oauth_callback),
        )
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Starts the server and background maintenance; returns after a graceful shutdown
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), db);
    let shutdown = state.shutdown.clone();
    let credentials = state.credentials.clone();

    let cleanup = StateCleanupService::new(config.clone(), state.states.clone());
    let cleanup_task = tokio::spawn(cleanup.run(shutdown.clone()));

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("API server shutting down");
        })
        .await?;

    if let Err(err) = cleanup_task.await {
        tracing::error!(error = %err, "State cleanup task panicked");
    }
    credentials.flush_audit().await;

    Ok(())
}

struct BearerAuthAddon;

impl Modify for BearerAuthAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT or service token")
                    .build(),
            ),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::oauth::start_oauth,
        crate::handlers::oauth::oauth_callback,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::delete_connection,
        crate::handlers::connections::connect_tiktok_blotato,
        crate::handlers::secrets::put_secret,
        crate::handlers::secrets::get_secret_status,
        crate::handlers::secrets::delete_secret,
        crate::handlers::published_videos::create_published_video,
        crate::handlers::published_videos::get_published_video,
        crate::handlers::publish::publish_instagram,
        crate::handlers::publish::publish_tiktok,
        crate::handlers::publish::publish_tiktok_blotato,
        crate::handlers::publish::publish_youtube,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::error::ErrorBody,
            crate::oauth::AuthorizationStart,
            crate::models::oauth_connection::ConnectionSummary,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::connections::BlotatoConnectRequest,
            crate::handlers::secrets::SaveSecretRequest,
            crate::credentials::SecretStatus,
            crate::handlers::published_videos::CreatePublishedVideoRequest,
            crate::handlers::published_videos::PublishedVideoResponse,
            crate::sink::PlatformEntry,
            crate::sink::PlatformStatus,
            crate::publish::PublishRequest,
            crate::publish::Privacy,
            crate::handlers::publish::PublishResponse,
        )
    ),
    modifiers(&BearerAuthAddon),
    info(
        title = "Publisher API",
        description = "Connects social accounts and publishes videos to Instagram, TikTok and YouTube",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
