use std::sync::Arc;

use axum::http::HeaderValue;
use chat_relay::agent::RigGateway;
use chat_relay::config::AppConfig;
use chat_relay::db::blob_store::{BlobStore, MemoryBlobStore, PgBlobStore};
use chat_relay::db::topic_repository::TopicRepository;
use chat_relay::errors::AppError;
use chat_relay::service::chat_service::ChatService;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_relay=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Storage ───────────────────────────────────────────────────────────────
    let blobs: Arc<dyn BlobStore> = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .map_err(AppError::DatabaseConnectionFailed)?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(AppError::MigrationFailed)?;

            info!("Database connection established and migrations applied");
            Arc::new(PgBlobStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL is not set; topics are kept in memory and lost on restart");
            Arc::new(MemoryBlobStore::new())
        }
    };

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let gateway = RigGateway::from_config(&config.llm)?;
    info!(
        "Completion service: {:?} at {} using model {}",
        config.llm.provider, config.llm.base_url, config.llm.model
    );
    let chat_service = ChatService::new(Arc::new(gateway), TopicRepository::new(blobs));

    // ── Router ────────────────────────────────────────────────────────────────
    let mut app = chat_relay::router(chat_service);
    if let Some(origin) = &config.cors_allow_origin {
        app = app.layer(cors_layer(origin)?);
    }

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

fn cors_layer(origin: &str) -> Result<CorsLayer, AppError> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin == "*" {
        return Ok(layer.allow_origin(Any));
    }
    let origin = HeaderValue::from_str(origin).map_err(|_| AppError::InvalidConfig {
        key: "CORS_ALLOW_ORIGIN".to_string(),
        value: origin.to_string(),
    })?;
    Ok(layer.allow_origin(origin))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections");
}
