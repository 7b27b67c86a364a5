use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use baseliner_api::rate_limit::TokenBucketLimiter;
use baseliner_config::BaselinerConfig;
use baseliner_store::{PostgresStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = Arc::new(BaselinerConfig::from_env().context("loading configuration")?);
    let store: Arc<dyn Store> = Arc::new(
        PostgresStore::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    let limiter = Arc::new(TokenBucketLimiter::new());

    spawn_maintenance(store.clone(), config.clone());

    let addr = format!("{}:{}", config.bind, config.port);
    let app = baseliner_api::build_app(store, config.clone(), limiter);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;

    tracing::info!(%addr, "starting baseliner control plane");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// Periodic retention sweep (spec 4.7). The one handler-free background task
/// the concurrency model permits: a maintenance sweep, not a per-request path.
fn spawn_maintenance(store: Arc<dyn Store>, config: Arc<BaselinerConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(config.maintenance_interval_seconds));
        loop {
            interval.tick().await;
            match store
                .prune(
                    config.maintenance_keep_days,
                    config.maintenance_keep_runs_per_device,
                    config.maintenance_batch_size,
                    false,
                )
                .await
            {
                Ok(report) => tracing::info!(
                    runs_deleted = report.runs_deleted,
                    run_items_deleted = report.run_items_deleted,
                    log_events_deleted = report.log_events_deleted,
                    "maintenance prune completed"
                ),
                Err(error) => tracing::error!(%error, "maintenance prune failed"),
            }
        }
    });
}
