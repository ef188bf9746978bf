//! Operational commands run beside the API server.
//!
//! ```text
//! yeepay-worker migrate         apply pending database migrations
//! yeepay-worker sync-previews   mirror LoRA preview images into the upload area
//! ```

use anyhow::{bail, Context};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use yeepay_db::catalog::PgCatalog;
use yeepay_db::DbPool;
use yeepay_pipeline::PipelineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yeepay_worker=info,yeepay_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = std::env::args().nth(1).unwrap_or_default();
    match command.as_str() {
        "migrate" => migrate().await,
        "sync-previews" => sync_previews().await,
        other => bail!("unknown command '{other}', expected 'migrate' or 'sync-previews'"),
    }
}

async fn connect() -> anyhow::Result<DbPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = yeepay_db::create_pool(&database_url)
        .await
        .context("Failed to connect to database")?;
    yeepay_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    Ok(pool)
}

async fn migrate() -> anyhow::Result<()> {
    let pool = connect().await?;
    yeepay_db::run_migrations(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations applied");
    pool.close().await;
    Ok(())
}

async fn sync_previews() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let pool = connect().await?;
    let catalog = PgCatalog::new(pool.clone());

    let report = yeepay_pipeline::previews::sync_lora_previews(&catalog, &config)
        .await
        .context("Preview sync failed")?;
    tracing::info!(
        copied = report.copied,
        up_to_date = report.up_to_date,
        missing = report.missing,
        failed = report.failed,
        "LoRA previews synced",
    );
    pool.close().await;
    Ok(())
}
