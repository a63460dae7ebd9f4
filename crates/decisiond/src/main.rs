//! Production entry point: loads configuration, wires the service graph,
//! and runs the background scheduler until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use decision_core::ServiceConfig;
use job_scheduler::Scheduler;
use market_data::RestMarketData;
use model_store::ModelStore;
use ranking_service::DecisionService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(ServiceConfig::from_env().context("loading configuration")?);
    tracing::info!(
        universe = config.universe.len(),
        markets = ?config
            .universe
            .iter()
            .map(|e| e.market.as_str())
            .collect::<std::collections::BTreeSet<_>>(),
        "configuration loaded"
    );

    let source = Arc::new(RestMarketData::from_env().context("configuring market data source")?);

    let model_root =
        std::env::var("MODEL_STORE_PATH").unwrap_or_else(|_| "./data/models".to_string());
    let store = Arc::new(ModelStore::open(&model_root).context("opening model store")?);
    match store.current() {
        Ok(artifact) => tracing::info!(
            version = %artifact.metadata.version,
            f1 = artifact.metadata.metrics.f1,
            "model loaded"
        ),
        Err(_) => tracing::warn!(
            "no model artifact yet; rankings defer until the first retrain promotes one"
        ),
    }

    let service = DecisionService::new(config, source, store);
    let scheduler = Scheduler::new(service);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    tracing::info!("shutdown requested");
    shutdown_tx.send(true).ok();

    scheduler_task.await.context("joining scheduler")?;
    tracing::info!("bye");
    Ok(())
}
