use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use yeepay_api::config::ServerConfig;
use yeepay_api::router::build_app_router;
use yeepay_api::state::AppState;
use yeepay_comfyui::{ComfyUIApi, Engine};
use yeepay_db::catalog::{Catalog, PgCatalog};
use yeepay_db::store::{PgTaskStore, TaskStore};
use yeepay_pipeline::previews::sync_lora_previews;
use yeepay_pipeline::{Orchestrator, PipelineConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "yeepay_api=debug,yeepay_pipeline=debug,tower_http=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    let pipeline_config =
        Arc::new(PipelineConfig::from_env().expect("Invalid pipeline configuration"));
    tracing::info!(
        host = %config.host,
        port = %config.port,
        environment = ?pipeline_config.environment,
        comfyui_url = %pipeline_config.comfyui_url,
        "Loaded configuration",
    );

    for dir in [&pipeline_config.output_dir, &pipeline_config.upload_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .unwrap_or_else(|e| panic!("Failed to create {}: {e}", dir.display()));
    }

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = yeepay_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    yeepay_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    yeepay_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(pool.clone()));
    let catalog: Arc<dyn Catalog> = Arc::new(PgCatalog::new(pool.clone()));

    // --- LoRA previews ---
    if let Err(e) = sync_lora_previews(catalog.as_ref(), &pipeline_config).await {
        tracing::warn!(error = %e, "LoRA preview sync failed");
    }

    // --- Engine + orchestrator ---
    let engine: Arc<dyn Engine> = Arc::new(ComfyUIApi::new(pipeline_config.comfyui_url.clone()));
    if !engine.healthy().await {
        tracing::warn!("ComfyUI is not reachable yet, tasks will wait for it");
    }

    let orchestrator = Orchestrator::new(
        store,
        Arc::clone(&catalog),
        engine,
        Arc::clone(&pipeline_config),
    );
    orchestrator.start();

    // --- App state ---
    let state = AppState {
        orchestrator: orchestrator.clone(),
        catalog,
        config: Arc::new(config.clone()),
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    orchestrator
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
